//! XML document synthesis for resource values, layouts and the manifest.
//!
//! All documents start with the UTF-8 XML declaration. Text and attribute
//! values are escaped so the output is always well-formed.

use std::fmt::Write;

/// Namespace URI bound to the `android:` prefix.
pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";

/// One `<item>` in a resource-value document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceItem {
    /// Resource type (`integer`, `bool`, `dimen`, ...).
    pub kind: String,
    pub name: String,
    /// Extra attributes rendered between `type` and `name`.
    pub extra_attributes: Vec<(String, String)>,
    pub value: String,
}

impl ResourceItem {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            extra_attributes: Vec::new(),
            value: value.into(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_attributes.push((name.into(), value.into()));
        self
    }
}

/// One element in a layout document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutNode {
    pub tag: String,
    /// Rendered in insertion order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, child: LayoutNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Inputs for the overlay's `AndroidManifest.xml`.
#[derive(Debug, Clone)]
pub struct ManifestSpec<'a> {
    pub target_package: &'a str,
    pub overlay_package: &'a str,
    pub target_version_name: &'a str,
    pub target_version_code: i64,
    pub overlay_permission: &'a str,
    pub overlay_format_version: u32,
}

/// Render a `<resources>` document holding `items`.
pub fn resource_values(items: &[ResourceItem]) -> String {
    let mut out = String::from(XML_DECL);
    let _ = write!(out, "<resources xmlns:android=\"{ANDROID_NS}\">");
    for item in items {
        let _ = write!(out, "<item type=\"{}\"", escape(&item.kind));
        for (name, value) in &item.extra_attributes {
            let _ = write!(out, " {}=\"{}\"", name, escape(value));
        }
        let _ = write!(
            out,
            " name=\"{}\">{}</item>",
            escape(&item.name),
            escape(&item.value)
        );
    }
    out.push_str("</resources>");
    out
}

/// Render one or more layout trees, depth-first.
pub fn layout(nodes: &[LayoutNode]) -> String {
    let mut out = String::from(XML_DECL);
    for node in nodes {
        render_node(&mut out, node);
    }
    out
}

fn render_node(out: &mut String, node: &LayoutNode) {
    let _ = writeln!(out, "<{}", node.tag);
    for (name, value) in &node.attributes {
        let _ = writeln!(out, "{}=\"{}\"", name, escape(value));
    }
    out.push_str(">\n");
    for child in &node.children {
        render_node(out, child);
    }
    let _ = writeln!(out, "</{}>", node.tag);
}

/// Render the overlay manifest.
///
/// Version metadata values are prefixed with `v=` so the platform reads
/// them as strings; the target package is declared twice because the
/// overlay resolver reads it from the metadata as well.
pub fn manifest(spec: &ManifestSpec<'_>) -> String {
    let target = escape(spec.target_package);
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"no\"?>",
    );
    let _ = write!(
        out,
        "<manifest xmlns:android=\"{ANDROID_NS}\" package=\"{}\" \
         android:versionCode=\"{v}\" android:versionName=\"{v}\"> ",
        escape(spec.overlay_package),
        v = spec.overlay_format_version,
    );
    let _ = write!(
        out,
        "<uses-permission android:name=\"{}\" />",
        escape(spec.overlay_permission)
    );
    let _ = write!(out, "<overlay android:targetPackage=\"{target}\" />");
    out.push_str("<application android:allowBackup=\"false\" android:hasCode=\"false\">");
    let _ = write!(
        out,
        "<meta-data android:name=\"app_version\" android:value=\"v={}\" />",
        escape(spec.target_version_name)
    );
    let _ = write!(
        out,
        "<meta-data android:name=\"app_version_code\" android:value=\"v={}\" />",
        spec.target_version_code
    );
    let _ = write!(
        out,
        "<meta-data android:name=\"overlay_version\" android:value=\"{}\" />",
        spec.overlay_format_version
    );
    let _ = write!(
        out,
        "<meta-data android:name=\"target_package\" android:value=\"{target}\" />"
    );
    out.push_str("</application></manifest>");
    out
}

/// Escape XML special characters in text or attribute values.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
