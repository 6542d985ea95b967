use core::ops::Range;




#[derive(Clone, Copy, Debug, PartialEq, Eq)]


/**
 * Identifier for one of the two panel coordinate axes
 */
pub enum Axis {
    A,
    B,
}




#[derive(Clone, Debug, PartialEq, Eq)]


/**
 * Represents a rectangular region in a discrete index space, on the alpha
 * (`di`) and beta (`dj`) axes of a panel
 */
pub struct IndexSpace {
    di: Range<i64>,
    dj: Range<i64>,
}




/**
 * Describes a rectangular index space. The index type is signed 64-bit integer.
 */
impl IndexSpace {


    pub fn new(di: Range<i64>, dj: Range<i64>) -> Self {

        assert!(
            di.start <= di.end && dj.start <= dj.end,
            "index space has negative volume");

        Self { di, dj }
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> (usize, usize) {
        ((self.di.end - self.di.start) as usize,
         (self.dj.end - self.dj.start) as usize)
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn len(&self) -> usize {
        let (l, m) = self.dim();
        l * m
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> (i64, i64) {
        (self.di.start, self.dj.start)
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> (i64, i64) {
        (self.di.end, self.dj.end)
    }


    /**
     * Return the range of indexes covered on one axis.
     */
    pub fn axis_range(&self, axis: Axis) -> Range<i64> {
        match axis {
            Axis::A => self.di.clone(),
            Axis::B => self.dj.clone(),
        }
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: (i64, i64)) -> bool {
        self.di.contains(&index.0) && self.dj.contains(&index.1)
    }


    /**
     * Expand this index space by the given number of elements on each axis.
     */
    pub fn extend_all(&self, delta: i64) -> Self {
        Self::new(
            self.di.start - delta .. self.di.end + delta,
            self.dj.start - delta .. self.dj.end + delta)
    }


    /**
     * Trim this index space by the given number of elements on each axis.
     */
    pub fn trim_all(&self, delta: i64) -> Self {
        self.extend_all(-delta)
    }


    /**
     * Shift this index space by the given offset.
     */
    pub fn translate(&self, delta: (i64, i64)) -> Self {
        Self::new(
            self.di.start + delta.0 .. self.di.end + delta.0,
            self.dj.start + delta.1 .. self.dj.end + delta.1)
    }


    /**
     * Return the linear offset for the given index, in a row-major memory
     * buffer aligned with the start of this index space.
     */
    pub fn row_major_offset(&self, index: (i64, i64)) -> usize {
        let i = (index.0 - self.di.start) as usize;
        let j = (index.1 - self.dj.start) as usize;
        let m = (self.dj.end - self.dj.start) as usize;
        i * m + j
    }


    /**
     * Return an iterator which traverses the index space in row-major order
     * (C-like; the final index increases fastest).
     */
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.di.clone().flat_map(move |i| self.dj.clone().map(move |j| (i, j)))
    }
}




// ============================================================================
impl From<(Range<i64>, Range<i64>)> for IndexSpace {
    fn from(range: (Range<i64>, Range<i64>)) -> Self {
        Self::new(range.0, range.1)
    }
}

impl From<IndexSpace> for (Range<i64>, Range<i64>) {
    fn from(space: IndexSpace) -> Self {
        (space.di, space.dj)
    }
}




/**
 * Less imposing factory function to construct an IndexSpace object.
 */
pub fn range2d(di: Range<i64>, dj: Range<i64>) -> IndexSpace {
    IndexSpace::new(di, dj)
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{range2d, Axis};

    #[test]
    fn index_space_iterates_in_row_major_order() {
        let space = range2d(2..4, -1..2);
        let indexes: Vec<_> = space.iter().collect();
        assert_eq!(indexes.len(), space.len());
        assert_eq!(indexes[0], (2, -1));
        assert_eq!(indexes[1], (2, 0));
        assert_eq!(indexes[3], (3, -1));
        for (n, index) in indexes.iter().enumerate() {
            assert_eq!(space.row_major_offset(*index), n);
        }
    }

    #[test]
    fn extending_then_trimming_restores_the_space() {
        let space = range2d(0..10, 0..5);
        let extended = space.extend_all(2);
        assert_eq!(extended.dim(), (14, 9));
        assert!(extended.contains((-2, 6)));
        assert!(!space.contains((-1, 0)));
        assert_eq!(extended.trim_all(2), space);
        assert_eq!(space.translate((3, -1)).axis_range(Axis::B), -1..4);
    }

    #[test]
    #[should_panic]
    fn inverted_index_space_panics() {
        range2d(3..1, 0..1);
    }
}
