//! Visual object kinds: per-kind column sets, creation specs and
//! update bundles.
//!
//! Attributes required at creation are plain constructor arguments;
//! attributes disabled at update simply do not exist on the update
//! structs, so the distinction is enforced by the type system rather
//! than checked at run time.

use std::fmt;

use simdb_store::{Array, FieldKind, FieldSpec, Value};

/// The object kinds a factory can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Mesh,
    Points,
    Arrows,
    Markers,
    Text,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Mesh => "Mesh",
            ObjectKind::Points => "Points",
            ObjectKind::Arrows => "Arrows",
            ObjectKind::Markers => "Markers",
            ObjectKind::Text => "Text",
        }
    }

    fn from_str(token: &str) -> Option<Self> {
        match token {
            "Mesh" => Some(ObjectKind::Mesh),
            "Points" => Some(ObjectKind::Points),
            "Arrows" => Some(ObjectKind::Arrows),
            "Markers" => Some(ObjectKind::Markers),
            "Text" => Some(ObjectKind::Text),
            _ => None,
        }
    }

    /// Parse a backing-table name `{Kind}_{factory}_{object}`.
    pub fn parse_table_name(table_name: &str) -> Option<(ObjectKind, usize, usize)> {
        let mut parts = table_name.split('_');
        let kind = ObjectKind::from_str(parts.next()?)?;
        let factory = parts.next()?.parse().ok()?;
        let object = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some((kind, factory, object))
    }

    /// Column set of the backing table for this kind.
    pub(crate) fn columns(self) -> Vec<FieldSpec> {
        match self {
            ObjectKind::Mesh => vec![
                FieldSpec::new("positions", FieldKind::Array),
                FieldSpec::new("cells", FieldKind::Array),
                FieldSpec::new("wireframe", FieldKind::Boolean),
                FieldSpec::new("line_width", FieldKind::Float),
                FieldSpec::new("color", FieldKind::Text),
                FieldSpec::new("alpha", FieldKind::Float),
                FieldSpec::new("scalar_field", FieldKind::Array),
                FieldSpec::new("at", FieldKind::Integer),
                FieldSpec::new("colormap", FieldKind::Text),
            ],
            ObjectKind::Points => vec![
                FieldSpec::new("positions", FieldKind::Array),
                FieldSpec::new("point_size", FieldKind::Integer),
                FieldSpec::new("color", FieldKind::Text),
                FieldSpec::new("alpha", FieldKind::Float),
                FieldSpec::new("scalar_field", FieldKind::Array),
                FieldSpec::new("at", FieldKind::Integer),
                FieldSpec::new("colormap", FieldKind::Text),
            ],
            ObjectKind::Arrows => vec![
                FieldSpec::new("positions", FieldKind::Array),
                FieldSpec::new("vectors", FieldKind::Array),
                FieldSpec::new("res", FieldKind::Integer),
                FieldSpec::new("color", FieldKind::Text),
                FieldSpec::new("alpha", FieldKind::Float),
                FieldSpec::new("scalar_field", FieldKind::Array),
                FieldSpec::new("at", FieldKind::Integer),
                FieldSpec::new("colormap", FieldKind::Text),
            ],
            ObjectKind::Markers => vec![
                FieldSpec::new("normal_to", FieldKind::Text),
                FieldSpec::new("indices", FieldKind::Array),
                FieldSpec::new("symbol", FieldKind::Text),
                FieldSpec::new("size", FieldKind::Float),
                FieldSpec::new("filled", FieldKind::Boolean),
                FieldSpec::new("color", FieldKind::Text),
                FieldSpec::new("alpha", FieldKind::Float),
                FieldSpec::new("scalar_field", FieldKind::Array),
                FieldSpec::new("at", FieldKind::Integer),
                FieldSpec::new("colormap", FieldKind::Text),
            ],
            ObjectKind::Text => vec![
                FieldSpec::new("content", FieldKind::Text),
                FieldSpec::new("corner", FieldKind::Text),
                FieldSpec::new("color", FieldKind::Text),
                FieldSpec::new("font", FieldKind::Text),
                FieldSpec::new("size", FieldKind::Integer),
                FieldSpec::new("bold", FieldKind::Boolean),
                FieldSpec::new("italic", FieldKind::Boolean),
                FieldSpec::new("at", FieldKind::Integer),
            ],
        }
    }

    /// Attributes a host bridge may drive between steps. Everything
    /// else is fixed at creation.
    pub(crate) fn updatable_attrs(self) -> &'static [&'static str] {
        match self {
            ObjectKind::Mesh => &[
                "positions",
                "alpha",
                "color",
                "scalar_field",
                "wireframe",
                "line_width",
            ],
            ObjectKind::Points => &["positions", "alpha", "color", "scalar_field", "point_size"],
            ObjectKind::Arrows => &["positions", "vectors", "alpha", "color", "scalar_field"],
            ObjectKind::Markers => &[
                "normal_to",
                "indices",
                "alpha",
                "color",
                "scalar_field",
                "symbol",
                "size",
                "filled",
            ],
            ObjectKind::Text => &["content", "color", "bold", "italic"],
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn push(values: &mut Vec<(String, Value)>, name: &str, value: impl Into<Value>) {
    values.push((name.to_string(), value.into()));
}

fn push_opt(values: &mut Vec<(String, Value)>, name: &str, value: Option<impl Into<Value>>) {
    if let Some(v) = value {
        values.push((name.to_string(), v.into()));
    }
}

/// Creation attributes of a mesh. Positions and cells are required;
/// style attributes default.
#[derive(Debug, Clone)]
pub struct MeshSpec {
    pub positions: Array,
    pub cells: Array,
    pub at: i64,
    pub alpha: f64,
    pub color: String,
    pub colormap: String,
    pub scalar_field: Array,
    pub wireframe: bool,
    pub line_width: f64,
}

impl MeshSpec {
    pub fn new(positions: Array, cells: Array) -> Self {
        Self {
            positions,
            cells,
            at: 0,
            alpha: 1.0,
            color: "green".to_string(),
            colormap: "jet".to_string(),
            scalar_field: Array::empty(),
            wireframe: false,
            line_width: -1.0,
        }
    }

    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push(&mut values, "positions", self.positions);
        push(&mut values, "cells", self.cells);
        push(&mut values, "wireframe", self.wireframe);
        push(&mut values, "line_width", self.line_width);
        push(&mut values, "color", self.color);
        push(&mut values, "alpha", self.alpha);
        push(&mut values, "scalar_field", self.scalar_field);
        push(&mut values, "at", self.at);
        push(&mut values, "colormap", self.colormap);
        values
    }
}

/// Per-step mesh changes. Topology (`cells`) and window placement are
/// fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct MeshUpdate {
    pub positions: Option<Array>,
    pub alpha: Option<f64>,
    pub color: Option<String>,
    pub scalar_field: Option<Array>,
    pub wireframe: Option<bool>,
    pub line_width: Option<f64>,
}

impl MeshUpdate {
    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push_opt(&mut values, "positions", self.positions);
        push_opt(&mut values, "alpha", self.alpha);
        push_opt(&mut values, "color", self.color);
        push_opt(&mut values, "scalar_field", self.scalar_field);
        push_opt(&mut values, "wireframe", self.wireframe);
        push_opt(&mut values, "line_width", self.line_width);
        values
    }
}

/// Creation attributes of a point cloud.
#[derive(Debug, Clone)]
pub struct PointsSpec {
    pub positions: Array,
    pub at: i64,
    pub alpha: f64,
    pub color: String,
    pub colormap: String,
    pub scalar_field: Array,
    pub point_size: i64,
}

impl PointsSpec {
    pub fn new(positions: Array) -> Self {
        Self {
            positions,
            at: 0,
            alpha: 1.0,
            color: "green".to_string(),
            colormap: "jet".to_string(),
            scalar_field: Array::empty(),
            point_size: 4,
        }
    }

    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push(&mut values, "positions", self.positions);
        push(&mut values, "point_size", self.point_size);
        push(&mut values, "color", self.color);
        push(&mut values, "alpha", self.alpha);
        push(&mut values, "scalar_field", self.scalar_field);
        push(&mut values, "at", self.at);
        push(&mut values, "colormap", self.colormap);
        values
    }
}

#[derive(Debug, Clone, Default)]
pub struct PointsUpdate {
    pub positions: Option<Array>,
    pub alpha: Option<f64>,
    pub color: Option<String>,
    pub scalar_field: Option<Array>,
    pub point_size: Option<i64>,
}

impl PointsUpdate {
    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push_opt(&mut values, "positions", self.positions);
        push_opt(&mut values, "alpha", self.alpha);
        push_opt(&mut values, "color", self.color);
        push_opt(&mut values, "scalar_field", self.scalar_field);
        push_opt(&mut values, "point_size", self.point_size);
        values
    }
}

/// Creation attributes of an arrow field. Positions and vectors must
/// have the same number of rows.
#[derive(Debug, Clone)]
pub struct ArrowsSpec {
    pub positions: Array,
    pub vectors: Array,
    pub at: i64,
    pub alpha: f64,
    pub color: String,
    pub colormap: String,
    pub scalar_field: Array,
    pub res: i64,
}

impl ArrowsSpec {
    pub fn new(positions: Array, vectors: Array) -> Self {
        Self {
            positions,
            vectors,
            at: 0,
            alpha: 1.0,
            color: "green".to_string(),
            colormap: "jet".to_string(),
            scalar_field: Array::empty(),
            res: 12,
        }
    }

    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push(&mut values, "positions", self.positions);
        push(&mut values, "vectors", self.vectors);
        push(&mut values, "res", self.res);
        push(&mut values, "color", self.color);
        push(&mut values, "alpha", self.alpha);
        push(&mut values, "scalar_field", self.scalar_field);
        push(&mut values, "at", self.at);
        push(&mut values, "colormap", self.colormap);
        values
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArrowsUpdate {
    pub positions: Option<Array>,
    pub vectors: Option<Array>,
    pub alpha: Option<f64>,
    pub color: Option<String>,
    pub scalar_field: Option<Array>,
}

impl ArrowsUpdate {
    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push_opt(&mut values, "positions", self.positions);
        push_opt(&mut values, "vectors", self.vectors);
        push_opt(&mut values, "alpha", self.alpha);
        push_opt(&mut values, "color", self.color);
        push_opt(&mut values, "scalar_field", self.scalar_field);
        values
    }
}

/// Creation attributes of markers centered on another object's
/// degrees of freedom. `normal_to` is the id of a previously created
/// mesh or point cloud.
#[derive(Debug, Clone)]
pub struct MarkersSpec {
    pub normal_to: usize,
    pub indices: Array,
    pub at: i64,
    pub alpha: f64,
    pub color: String,
    pub colormap: String,
    pub scalar_field: Array,
    pub symbol: String,
    pub size: f64,
    pub filled: bool,
}

impl MarkersSpec {
    pub fn new(normal_to: usize, indices: Array) -> Self {
        Self {
            normal_to,
            indices,
            at: 0,
            alpha: 1.0,
            color: "green".to_string(),
            colormap: "jet".to_string(),
            scalar_field: Array::empty(),
            symbol: "o".to_string(),
            size: 1.0,
            filled: true,
        }
    }

    /// `normal_to` resolves to the attached object's backing-table
    /// name before storage.
    pub(crate) fn into_values(self, normal_to_table: String) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push(&mut values, "normal_to", normal_to_table);
        push(&mut values, "indices", self.indices);
        push(&mut values, "symbol", self.symbol);
        push(&mut values, "size", self.size);
        push(&mut values, "filled", self.filled);
        push(&mut values, "color", self.color);
        push(&mut values, "alpha", self.alpha);
        push(&mut values, "scalar_field", self.scalar_field);
        push(&mut values, "at", self.at);
        push(&mut values, "colormap", self.colormap);
        values
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarkersUpdate {
    pub normal_to: Option<usize>,
    pub indices: Option<Array>,
    pub alpha: Option<f64>,
    pub color: Option<String>,
    pub scalar_field: Option<Array>,
    pub symbol: Option<String>,
    pub size: Option<f64>,
    pub filled: Option<bool>,
}

impl MarkersUpdate {
    pub(crate) fn into_values(self, normal_to_table: Option<String>) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push_opt(&mut values, "normal_to", normal_to_table);
        push_opt(&mut values, "indices", self.indices);
        push_opt(&mut values, "alpha", self.alpha);
        push_opt(&mut values, "color", self.color);
        push_opt(&mut values, "scalar_field", self.scalar_field);
        push_opt(&mut values, "symbol", self.symbol);
        push_opt(&mut values, "size", self.size);
        push_opt(&mut values, "filled", self.filled);
        values
    }
}

/// Creation attributes of a 2D text overlay. `corner` combines
/// vertical (T/M/B) and horizontal (L/M/R) placement, e.g. `"BR"`.
#[derive(Debug, Clone)]
pub struct TextSpec {
    pub content: String,
    pub at: i64,
    pub corner: String,
    pub color: String,
    pub font: String,
    pub size: i64,
    pub bold: bool,
    pub italic: bool,
}

impl TextSpec {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            at: 0,
            corner: "BR".to_string(),
            color: "black".to_string(),
            font: String::new(),
            size: -1,
            bold: false,
            italic: false,
        }
    }

    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push(&mut values, "content", self.content);
        push(&mut values, "corner", self.corner);
        push(&mut values, "color", self.color);
        push(&mut values, "font", self.font);
        push(&mut values, "size", self.size);
        push(&mut values, "bold", self.bold);
        push(&mut values, "italic", self.italic);
        push(&mut values, "at", self.at);
        values
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextUpdate {
    pub content: Option<String>,
    pub color: Option<String>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
}

impl TextUpdate {
    pub(crate) fn into_values(self) -> Vec<(String, Value)> {
        let mut values = Vec::new();
        push_opt(&mut values, "content", self.content);
        push_opt(&mut values, "color", self.color);
        push_opt(&mut values, "bold", self.bold);
        push_opt(&mut values, "italic", self.italic);
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_parsing() {
        assert_eq!(
            ObjectKind::parse_table_name("Mesh_0_3"),
            Some((ObjectKind::Mesh, 0, 3))
        );
        assert_eq!(
            ObjectKind::parse_table_name("Points_2_0"),
            Some((ObjectKind::Points, 2, 0))
        );
        assert_eq!(ObjectKind::parse_table_name("Readings"), None);
        assert_eq!(ObjectKind::parse_table_name("Mesh_x_0"), None);
        assert_eq!(ObjectKind::parse_table_name("Mesh_0_0_0"), None);
    }

    #[test]
    fn spec_values_match_column_sets() {
        let mesh = MeshSpec::new(
            Array::from_rows(&[vec![0.0, 0.0, 0.0]]).unwrap(),
            Array::from_rows(&[vec![0.0, 1.0, 2.0]]).unwrap(),
        );
        let columns: Vec<String> = ObjectKind::Mesh
            .columns()
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        let provided: Vec<String> = mesh.into_values().into_iter().map(|(name, _)| name).collect();
        assert_eq!(provided, columns);

        let text = TextSpec::new("hello");
        let columns: Vec<String> = ObjectKind::Text
            .columns()
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        let provided: Vec<String> = text.into_values().into_iter().map(|(name, _)| name).collect();
        assert_eq!(provided, columns);
    }

    #[test]
    fn updates_skip_unset_attributes() {
        let update = MeshUpdate {
            alpha: Some(0.5),
            ..Default::default()
        };
        let values = update.into_values();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].0, "alpha");
    }
}
