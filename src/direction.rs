use serde::{Deserialize, Serialize};




#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]


/**
 * One of the eight directions from a patch interior toward its halo: four
 * edges and four corners. Right and Left are along the alpha axis; Top and
 * Bottom along beta.
 */
pub enum Direction {
    Right,
    Top,
    Left,
    Bottom,
    TopRight,
    TopLeft,
    BottomLeft,
    BottomRight,
}




// ============================================================================
impl Direction {

    pub const ALL: [Direction; 8] = [
        Direction::Right,
        Direction::Top,
        Direction::Left,
        Direction::Bottom,
        Direction::TopRight,
        Direction::TopLeft,
        Direction::BottomLeft,
        Direction::BottomRight,
    ];


    pub fn is_edge(self) -> bool {
        matches!(self, Direction::Right | Direction::Top | Direction::Left | Direction::Bottom)
    }


    pub fn is_corner(self) -> bool {
        !self.is_edge()
    }


    /**
     * Return the outward unit step `(sa, sb)` on the alpha and beta axes.
     */
    pub fn signs(self) -> (i64, i64) {
        use Direction::*;

        match self {
            Right       => ( 1,  0),
            Top         => ( 0,  1),
            Left        => (-1,  0),
            Bottom      => ( 0, -1),
            TopRight    => ( 1,  1),
            TopLeft     => (-1,  1),
            BottomLeft  => (-1, -1),
            BottomRight => ( 1, -1),
        }
    }


    /**
     * Return the direction with the given outward step, if the step is not
     * zero on both axes.
     */
    pub fn from_signs(signs: (i64, i64)) -> Option<Direction> {
        Self::ALL.iter().copied().find(|d| d.signs() == (signs.0.signum(), signs.1.signum()))
    }


    /**
     * Return the direction pointing the opposite way.
     */
    pub fn reverse(self) -> Direction {
        let (sa, sb) = self.signs();
        match Self::from_signs((-sa, -sb)) {
            Some(d) => d,
            None => unreachable!(),
        }
    }


    /**
     * For a corner, return the pair of edges (alpha-side, beta-side) that
     * meet at it. Edges return themselves on their own axis.
     */
    pub fn edge_components(self) -> (Option<Direction>, Option<Direction>) {
        let (sa, sb) = self.signs();
        (Self::from_signs((sa, 0)), Self::from_signs((0, sb)))
    }


    /**
     * Whether an edge runs along the beta axis (its normal is alpha).
     */
    pub fn runs_along_beta(self) -> bool {
        matches!(self, Direction::Right | Direction::Left)
    }
}
