use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, SubAssign};

/// Skill levels, one slot per skill dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Skills(Vec<i32>);

impl Skills {
    pub fn zeros(nskills: usize) -> Self {
        Self(vec![0; nskills])
    }

    pub fn from_vec(levels: Vec<i32>) -> Self {
        Self(levels)
    }

    /// A single level-1 skill in slot `index`.
    pub fn unit(nskills: usize, index: usize) -> Self {
        let mut levels = vec![0; nskills];
        levels[index] = 1;
        Self(levels)
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|s| *s == 0)
    }

    pub fn max_level(&self) -> i32 {
        self.0.iter().copied().max().unwrap_or(0)
    }

    pub fn breadth(&self) -> usize {
        self.0.iter().filter(|s| **s != 0).count()
    }

    pub fn total(&self) -> i32 {
        self.0.iter().sum()
    }

    pub fn plus(&self, other: &Skills) -> Skills {
        let mut out = self.clone();
        out += other;
        out
    }

    pub fn minus(&self, other: &Skills) -> Skills {
        let mut out = self.clone();
        out -= other;
        out
    }
}

impl AddAssign<&Skills> for Skills {
    fn add_assign(&mut self, rhs: &Skills) {
        for (a, b) in self.0.iter_mut().zip(&rhs.0) {
            *a += b;
        }
    }
}

impl SubAssign<&Skills> for Skills {
    fn sub_assign(&mut self, rhs: &Skills) {
        for (a, b) in self.0.iter_mut().zip(&rhs.0) {
            *a -= b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = Skills::from_vec(vec![1, 0, 2]);
        let b = Skills::unit(3, 1);
        let sum = a.plus(&b);
        assert_eq!(sum.as_slice(), &[1, 1, 2]);
        assert_eq!(sum.minus(&b), a);
        assert_eq!(sum.breadth(), 3);
        assert_eq!(sum.max_level(), 2);
        assert_eq!(sum.total(), 4);
        assert!(Skills::zeros(3).is_empty());
    }
}
