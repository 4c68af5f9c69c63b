//! Quadtree spatial index over bounding boxes
//!
//! This module provides an immutable region quadtree rooted at the extent of the indexed
//! geometries. Every item is stored at the deepest node whose box fully contains the
//! item's box, so a range query only has to visit nodes that intersect the query box and
//! can never miss an item whose box intersects it.

use crate::overlay::PreparedParcels;
use geo::{BoundingRect, Coord, Rect};

/// Maximum depth of the quadtree to prevent unbounded recursion on clustered input
const MAX_DEPTH: u32 = 16;

/// Default number of items a node holds before it subdivides
pub const DEFAULT_NODE_CAPACITY: usize = 8;

/// An indexed bounding box and the slot it refers to
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    slot: usize,
    bbox: Rect<f64>,
}

/// A single node in the quadtree
#[derive(Debug, Clone)]
struct IndexNode {
    /// Bounding box covered by this node
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Entries that do not fit entirely inside a single child
    entries: Vec<IndexEntry>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[IndexNode; 4]>>,
}

/// Bounding-box index answering "which items might touch this box" queries
///
/// Built once, then read-only: queries take `&self` and the index is `Send + Sync`, so
/// it can be shared by reference between worker threads.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    root: Option<IndexNode>,
    len: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SpatialIndex {
    /// Build an index from `(slot, bounding box)` pairs
    ///
    /// `node_capacity` is the number of entries a node holds before subdividing.
    pub fn build(items: impl IntoIterator<Item = (usize, Rect<f64>)>, node_capacity: usize) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("index::build");

        let entries: Vec<IndexEntry> = items
            .into_iter()
            .map(|(slot, bbox)| IndexEntry { slot, bbox })
            .collect();

        let Some(extent) = entries
            .iter()
            .map(|e| e.bbox)
            .reduce(crate::crs::merge_rects)
        else {
            return Self { root: None, len: 0 };
        };

        let capacity = node_capacity.max(1);
        let len = entries.len();
        let mut root = IndexNode::new(extent, 0);
        for entry in entries {
            root.insert(entry, capacity);
        }

        tracing::debug!("Built spatial index over {} items", len);
        Self {
            root: Some(root),
            len,
        }
    }

    /// Build an index over prepared parcels; slots are positions in `parcels`
    pub fn from_parcels(parcels: &PreparedParcels, node_capacity: usize) -> Self {
        Self::build(
            parcels.iter().enumerate().map(|(slot, p)| (slot, p.bbox)),
            node_capacity,
        )
    }

    /// Slots whose bounding box intersects `rect` (boundaries inclusive), ascending
    ///
    /// This is a conservative candidate set: exact intersection is up to the caller.
    pub fn query(&self, rect: Rect<f64>) -> Vec<usize> {
        let mut results = Vec::new();
        if let Some(root) = &self.root {
            root.query(rect, &mut results);
        }
        results.sort_unstable();
        results
    }

    /// Candidates for a geometry's bounding box; empty for geometries without coordinates
    pub fn query_geometry<G: BoundingRect<f64>>(&self, geometry: &G) -> Vec<usize>
    where
        G::Output: Into<Option<Rect<f64>>>,
    {
        match geometry.bounding_rect().into() {
            Some(rect) => self.query(rect),
            None => Vec::new(),
        }
    }

    /// Number of indexed items
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extent covered by the root node
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.root.as_ref().map(|r| r.bounding_box)
    }

    /// Depth of the deepest node (0 for a single root)
    pub fn depth(&self) -> u32 {
        self.root.as_ref().map_or(0, IndexNode::depth)
    }
}

impl IndexNode {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            entries: Vec::new(),
            children: None,
        }
    }

    /// Subdivide this node into 4 children
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return; // Already subdivided
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let level = self.level + 1;

        let nw = IndexNode::new(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            level,
        );
        let ne = IndexNode::new(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            level,
        );
        let sw = IndexNode::new(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            level,
        );
        let se = IndexNode::new(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            level,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));
    }

    /// Insert an entry at the deepest node that fully contains it
    fn insert(&mut self, entry: IndexEntry, capacity: usize) {
        if let Some(children) = &mut self.children {
            if let Some(child) = children
                .iter_mut()
                .find(|c| rect_contains(c.bounding_box, entry.bbox))
            {
                child.insert(entry, capacity);
                return;
            }
            self.entries.push(entry);
            return;
        }

        self.entries.push(entry);
        if self.entries.len() > capacity && self.level < MAX_DEPTH {
            self.subdivide();
            // Push entries down where they fit entirely inside one child
            let entries = std::mem::take(&mut self.entries);
            for e in entries {
                self.insert(e, capacity);
            }
        }
    }

    /// Collect slots of entries intersecting the query box
    fn query(&self, rect: Rect<f64>, results: &mut Vec<usize>) {
        if !rects_intersect(self.bounding_box, rect) {
            return;
        }

        results.extend(
            self.entries
                .iter()
                .filter(|e| rects_intersect(e.bbox, rect))
                .map(|e| e.slot),
        );

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(rect, results);
            }
        }
    }

    fn depth(&self) -> u32 {
        match &self.children {
            Some(children) => children.iter().map(IndexNode::depth).max().unwrap_or(self.level),
            None => self.level,
        }
    }
}

/// Check if two rectangles intersect (touching counts)
#[inline]
fn rects_intersect(a: Rect<f64>, b: Rect<f64>) -> bool {
    !(a.max().x < b.min().x || a.min().x > b.max().x || a.max().y < b.min().y || a.min().y > b.max().y)
}

/// Check if `outer` fully contains `inner` (boundaries inclusive)
#[inline]
fn rect_contains(outer: Rect<f64>, inner: Rect<f64>) -> bool {
    inner.min().x >= outer.min().x
        && inner.max().x <= outer.max().x
        && inner.min().y >= outer.min().y
        && inner.max().y <= outer.max().y
}
