//! Detects ruled table regions on every page of a return and turns each one
//! into a [`RawGrid`] of cell text.
//!
//! Only drawn geometry is used: rectangles and axis-aligned strokes become
//! edges, touching edges are grouped into regions, and the clustered edge
//! positions of a region give its row and column boundaries. Text runs are
//! then dropped into the cell containing their anchor point.

use crate::error::{ReconcileError, Result};
use crate::schema::RawGrid;
use log::{debug, trace};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object};
use std::cmp::Ordering;
use std::path::Path;

/// Source of raw page grids for one return.
pub trait GridLocator: Send + Sync {
    /// All table regions of the document, ordered by page then top to bottom.
    fn locate(&self, path: &Path) -> Result<Vec<RawGrid>>;
}

/// Default tolerance (in points) for snapping edges and joining regions.
pub const DEFAULT_GRID_TOLERANCE: f32 = 3.0;

/// Lines thinner than this are treated as strokes rather than boxes.
const THIN_RECT: f32 = 2.0;

/// Fraction of the font size the cell anchor sits above the baseline.
const ANCHOR_RISE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self × other` in PDF row-vector convention.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [oa, ob, oc, od, oe, of] = other.0;
        Matrix([
            a * oa + b * oc,
            a * ob + b * od,
            c * oa + d * oc,
            c * ob + d * od,
            e * oa + f * oc + oe,
            e * ob + f * od + of,
        ])
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    fn vertical_scale(&self) -> f32 {
        (self.0[1] * self.0[1] + self.0[3] * self.0[3]).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Horizontal,
    Vertical,
}

/// An axis-aligned ruling line in device space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Edge {
    orientation: Orientation,
    /// y for horizontal edges, x for vertical ones.
    position: f32,
    start: f32,
    end: f32,
}

impl Edge {
    fn new(orientation: Orientation, position: f32, a: f32, b: f32) -> Self {
        Self {
            orientation,
            position,
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// (x0, y0, x1, y1)
    fn bounds(&self) -> (f32, f32, f32, f32) {
        match self.orientation {
            Orientation::Horizontal => (self.start, self.position, self.end, self.position),
            Orientation::Vertical => (self.position, self.start, self.position, self.end),
        }
    }

    fn touches(&self, other: &Edge, tolerance: f32) -> bool {
        let (ax0, ay0, ax1, ay1) = self.bounds();
        let (bx0, by0, bx1, by1) = other.bounds();
        ax0 - tolerance <= bx1 && bx0 - tolerance <= ax1 && ay0 - tolerance <= by1 && by0 - tolerance <= ay1
    }
}

/// A run of shown text anchored in device space.
#[derive(Debug, Clone, PartialEq)]
struct TextRun {
    x: f32,
    y: f32,
    text: String,
}

/// Geometry and text collected from one page's content stream.
#[derive(Debug, Default)]
struct PageLayout {
    edges: Vec<Edge>,
    runs: Vec<TextRun>,
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
}

struct ContentInterpreter {
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    leading: f32,
    font_size: f32,
    current_point: Option<(f32, f32)>,
    subpath_start: Option<(f32, f32)>,
    pending: Vec<Edge>,
    layout: PageLayout,
}

fn number(operands: &[Object], index: usize) -> Option<f32> {
    operands.get(index).and_then(|o| o.as_float().ok())
}

/// Decodes a shown string: UTF-16BE when it carries a byte-order mark,
/// Latin-1 otherwise.
fn decode_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

fn shown_text(object: &Object) -> String {
    match object {
        Object::String(bytes, _) => decode_string(bytes),
        Object::Array(items) => {
            let mut text = String::new();
            for item in items {
                match item {
                    Object::String(bytes, _) => text.push_str(&decode_string(bytes)),
                    // Large negative kerning separates words.
                    other => {
                        if other.as_float().map(|k| k < -200.0).unwrap_or(false) && !text.ends_with(' ') {
                            text.push(' ');
                        }
                    }
                }
            }
            text
        }
        _ => String::new(),
    }
}

impl ContentInterpreter {
    fn new() -> Self {
        Self {
            state: GraphicsState { ctm: Matrix::IDENTITY },
            stack: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            leading: 0.0,
            font_size: 10.0,
            current_point: None,
            subpath_start: None,
            pending: Vec::new(),
            layout: PageLayout::default(),
        }
    }

    fn run(mut self, operations: &[Operation]) -> PageLayout {
        for operation in operations {
            self.step(operation);
        }
        self.layout
    }

    fn step(&mut self, operation: &Operation) {
        let ops = &operation.operands;
        match operation.operator.as_str() {
            "q" => self.stack.push(self.state),
            "Q" => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }
            "cm" => {
                if let Some(m) = self.matrix_operands(ops) {
                    self.state.ctm = m.then(&self.state.ctm);
                }
            }
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = number(ops, 1) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = number(ops, 0) {
                    self.leading = leading;
                }
            }
            "Tm" => {
                if let Some(m) = self.matrix_operands(ops) {
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (number(ops, 0), number(ops, 1)) {
                    self.next_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (number(ops, 0), number(ops, 1)) {
                    self.leading = -ty;
                    self.next_line(tx, ty);
                }
            }
            "T*" => self.next_line(0.0, -self.leading),
            "Tj" | "TJ" => {
                if let Some(object) = ops.first() {
                    self.show(object);
                }
            }
            "'" => {
                self.next_line(0.0, -self.leading);
                if let Some(object) = ops.first() {
                    self.show(object);
                }
            }
            "\"" => {
                self.next_line(0.0, -self.leading);
                if let Some(object) = ops.get(2) {
                    self.show(object);
                }
            }
            "re" => {
                if let (Some(x), Some(y), Some(w), Some(h)) =
                    (number(ops, 0), number(ops, 1), number(ops, 2), number(ops, 3))
                {
                    self.rectangle(x, y, w, h);
                }
            }
            "m" => {
                if let (Some(x), Some(y)) = (number(ops, 0), number(ops, 1)) {
                    let point = self.state.ctm.apply(x, y);
                    self.current_point = Some(point);
                    self.subpath_start = Some(point);
                }
            }
            "l" => {
                if let (Some(x), Some(y)) = (number(ops, 0), number(ops, 1)) {
                    let point = self.state.ctm.apply(x, y);
                    if let Some(from) = self.current_point {
                        self.segment(from, point);
                    }
                    self.current_point = Some(point);
                }
            }
            "h" => {
                if let (Some(from), Some(to)) = (self.current_point, self.subpath_start) {
                    self.segment(from, to);
                    self.current_point = Some(to);
                }
            }
            "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                self.layout.edges.append(&mut self.pending);
                self.current_point = None;
            }
            // Clipping paths are not drawn.
            "n" => {
                self.pending.clear();
                self.current_point = None;
            }
            _ => {}
        }
    }

    fn matrix_operands(&self, ops: &[Object]) -> Option<Matrix> {
        let mut values = [0.0f32; 6];
        for (i, value) in values.iter_mut().enumerate() {
            *value = number(ops, i)?;
        }
        Some(Matrix(values))
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn show(&mut self, object: &Object) {
        let text = shown_text(object);
        let rendering = self.text_matrix.then(&self.state.ctm);
        let (x, y) = rendering.apply(0.0, 0.0);
        let rise = self.font_size * rendering.vertical_scale() * ANCHOR_RISE;

        // Glyph widths are unknown; advance by half an em per character.
        let advance = text.chars().count() as f32 * self.font_size * 0.5;
        self.text_matrix = Matrix::translate(advance, 0.0).then(&self.text_matrix);

        if !text.trim().is_empty() {
            trace!("text run at ({:.1}, {:.1}): {:?}", x, y, text);
            self.layout.runs.push(TextRun { x, y: y + rise, text });
        }
    }

    fn rectangle(&mut self, x: f32, y: f32, w: f32, h: f32) {
        let (x0, y0) = self.state.ctm.apply(x, y);
        let (x1, y1) = self.state.ctm.apply(x + w, y + h);
        let (left, right) = (x0.min(x1), x0.max(x1));
        let (bottom, top) = (y0.min(y1), y0.max(y1));

        if right - left <= THIN_RECT && top - bottom > THIN_RECT {
            let mid = (left + right) / 2.0;
            self.pending.push(Edge::new(Orientation::Vertical, mid, bottom, top));
        } else if top - bottom <= THIN_RECT && right - left > THIN_RECT {
            let mid = (bottom + top) / 2.0;
            self.pending.push(Edge::new(Orientation::Horizontal, mid, left, right));
        } else if right - left > THIN_RECT {
            self.pending.extend([
                Edge::new(Orientation::Horizontal, bottom, left, right),
                Edge::new(Orientation::Horizontal, top, left, right),
                Edge::new(Orientation::Vertical, left, bottom, top),
                Edge::new(Orientation::Vertical, right, bottom, top),
            ]);
        }
        self.current_point = None;
    }

    fn segment(&mut self, from: (f32, f32), to: (f32, f32)) {
        let (dx, dy) = ((to.0 - from.0).abs(), (to.1 - from.1).abs());
        if dy <= THIN_RECT && dx > THIN_RECT {
            self.pending
                .push(Edge::new(Orientation::Horizontal, (from.1 + to.1) / 2.0, from.0, to.0));
        } else if dx <= THIN_RECT && dy > THIN_RECT {
            self.pending
                .push(Edge::new(Orientation::Vertical, (from.0 + to.0) / 2.0, from.1, to.1));
        }
    }
}

/// Merges sorted values closer than `tolerance` into their centroids.
fn cluster_positions(values: &[f32], tolerance: f32) -> Vec<f32> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut clusters: Vec<Vec<f32>> = Vec::new();
    for value in sorted {
        match clusters.last_mut() {
            Some(cluster) if cluster.last().map(|last| value - last <= tolerance).unwrap_or(false) => {
                cluster.push(value)
            }
            _ => clusters.push(vec![value]),
        }
    }

    clusters
        .iter()
        .map(|cluster| cluster.iter().sum::<f32>() / cluster.len() as f32)
        .collect()
}

/// Groups edges that touch (directly or through others) into regions.
fn group_edges(edges: &[Edge], tolerance: f32) -> Vec<Vec<Edge>> {
    let mut parent: Vec<usize> = (0..edges.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..edges.len() {
        for j in (i + 1)..edges.len() {
            if edges[i].touches(&edges[j], tolerance) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut groups: Vec<(usize, Vec<Edge>)> = Vec::new();
    for (i, edge) in edges.iter().enumerate() {
        let root = find(&mut parent, i);
        match groups.iter_mut().find(|(r, _)| *r == root) {
            Some((_, group)) => group.push(*edge),
            None => groups.push((root, vec![*edge])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A region's cells, top row first. `None` when the region is not a table.
fn region_rows(region: &[Edge], runs: &[TextRun], tolerance: f32) -> Option<(f32, f32, Vec<Vec<String>>)> {
    let horizontal: Vec<f32> = region
        .iter()
        .filter(|e| e.orientation == Orientation::Horizontal)
        .map(|e| e.position)
        .collect();
    let vertical: Vec<f32> = region
        .iter()
        .filter(|e| e.orientation == Orientation::Vertical)
        .map(|e| e.position)
        .collect();

    let mut row_lines = cluster_positions(&horizontal, tolerance);
    let column_lines = cluster_positions(&vertical, tolerance);
    // At least one row and two columns.
    if row_lines.len() < 2 || column_lines.len() < 3 {
        return None;
    }
    row_lines.reverse();

    let row_count = row_lines.len() - 1;
    let column_count = column_lines.len() - 1;
    let mut cells: Vec<Vec<Vec<&TextRun>>> = vec![vec![Vec::new(); column_count]; row_count];

    for run in runs {
        let row = row_lines.windows(2).position(|w| run.y <= w[0] && run.y > w[1]);
        let col = column_lines.windows(2).position(|w| run.x >= w[0] - tolerance && run.x < w[1]);
        if let (Some(row), Some(col)) = (row, col) {
            cells[row][col].push(run);
        }
    }

    let rows = cells
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|mut fragments| {
                    fragments.sort_by(|a, b| {
                        b.y.partial_cmp(&a.y)
                            .unwrap_or(Ordering::Equal)
                            .then(a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal))
                    });
                    let joined: Vec<&str> = fragments.iter().map(|f| f.text.as_str()).collect();
                    normalize_whitespace(&joined.join(" "))
                })
                .collect()
        })
        .collect();

    Some((row_lines[0], column_lines[0], rows))
}

/// Table regions of one page, top to bottom then left to right.
fn page_grids(page: u32, layout: &PageLayout, tolerance: f32) -> Vec<RawGrid> {
    let mut regions: Vec<(f32, f32, Vec<Vec<String>>)> = group_edges(&layout.edges, tolerance)
        .iter()
        .filter_map(|region| region_rows(region, &layout.runs, tolerance))
        .collect();

    regions.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    });

    regions
        .into_iter()
        .map(|(_, _, rows)| RawGrid::from_rows(page, rows))
        .collect()
}

/// [`GridLocator`] reading ruled tables from PDF content streams.
#[derive(Debug, Clone)]
pub struct PdfGridLocator {
    tolerance: f32,
}

impl Default for PdfGridLocator {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_TOLERANCE)
    }
}

impl PdfGridLocator {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    fn pdf_error(path: &Path, details: impl ToString) -> ReconcileError {
        ReconcileError::PdfError {
            document: path.display().to_string(),
            details: details.to_string(),
        }
    }

    /// Grids of an already loaded document.
    pub fn locate_in(&self, document: &Document, path: &Path) -> Result<Vec<RawGrid>> {
        let mut grids = Vec::new();

        for (page_number, page_id) in document.get_pages() {
            let bytes = document
                .get_page_content(page_id)
                .map_err(|e| Self::pdf_error(path, e))?;
            let content = Content::decode(&bytes).map_err(|e| Self::pdf_error(path, e))?;

            let layout = ContentInterpreter::new().run(&content.operations);
            let page = page_grids(page_number, &layout, self.tolerance);
            debug!(
                "{} page {}: {} edges, {} text runs, {} table regions",
                path.display(),
                page_number,
                layout.edges.len(),
                layout.runs.len(),
                page.len()
            );
            grids.extend(page);
        }

        Ok(grids)
    }
}

impl GridLocator for PdfGridLocator {
    fn locate(&self, path: &Path) -> Result<Vec<RawGrid>> {
        let document = Document::load(path).map_err(|e| Self::pdf_error(path, e))?;
        self.locate_in(&document, path)
    }
}
