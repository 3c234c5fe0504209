use serde::Serialize;

use crate::rowhash::digest_hex;

/// Side the sibling hash sits on, relative to the node being proven.
/// Verification concatenates in construction order (left node first), so
/// every proof step must carry this flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofStep {
    pub sibling: String,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    pub included: bool,
    pub leaf_hash: String,
    pub branch: Vec<ProofStep>,
    pub root: String,
}

/// Binary hash tree over a period's row hashes.
///
/// Leaves are sorted lexicographically before the tree is built, so the root
/// is independent of ingestion/arrival order. An odd level duplicates its
/// last entry as its own pair partner. The tree is ephemeral; only the root
/// (and proofs generated on demand) leave this module.
pub struct MerkleTree {
    // levels[0] holds the sorted leaves; the last level has exactly one hash.
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    /// Returns `None` for an empty leaf set; an empty period has no root.
    pub fn build(mut leaves: Vec<String>) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }
        leaves.sort();

        let mut levels = Vec::new();
        let mut current = leaves;
        while current.len() > 1 {
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                next.push(digest_hex(&format!("{left}{right}")));
            }
            levels.push(current);
            current = next;
        }
        levels.push(current);

        Some(Self { levels })
    }

    pub fn root(&self) -> &str {
        &self.levels[self.levels.len() - 1][0]
    }

    /// Inclusion proof for `leaf`. A leaf not present in the tree yields
    /// `included: false` with an empty branch.
    pub fn prove(&self, leaf: &str) -> Proof {
        let Some(mut index) = self.levels[0].iter().position(|l| l == leaf) else {
            return Proof {
                included: false,
                leaf_hash: leaf.to_string(),
                branch: Vec::new(),
                root: self.root().to_string(),
            };
        };

        let mut branch = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling_index, position) = if index % 2 == 0 {
                (index + 1, Position::Right)
            } else {
                (index - 1, Position::Left)
            };
            // A missing right sibling means this node was duplicated.
            let sibling = level.get(sibling_index).unwrap_or(&level[index]);
            branch.push(ProofStep {
                sibling: sibling.clone(),
                position,
            });
            index /= 2;
        }

        Proof {
            included: true,
            leaf_hash: leaf.to_string(),
            branch,
            root: self.root().to_string(),
        }
    }
}

/// Fold a candidate leaf through the branch and compare against the claimed
/// root. Concatenation order follows each step's position flag.
pub fn verify(leaf: &str, branch: &[ProofStep], root: &str) -> bool {
    let mut current = leaf.to_string();
    for step in branch {
        current = match step.position {
            Position::Right => digest_hex(&format!("{current}{}", step.sibling)),
            Position::Left => digest_hex(&format!("{}{current}", step.sibling)),
        };
    }
    current == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| digest_hex(&format!("row-{i}"))).collect()
    }

    #[test]
    fn root_is_independent_of_leaf_order() {
        let forward = leaves(7);
        let mut reversed = forward.clone();
        reversed.reverse();
        let mut rotated = forward.clone();
        rotated.rotate_left(3);

        let root = MerkleTree::build(forward).unwrap().root().to_string();
        assert_eq!(MerkleTree::build(reversed).unwrap().root(), root);
        assert_eq!(MerkleTree::build(rotated).unwrap().root(), root);
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let leaf = digest_hex("only");
        let tree = MerkleTree::build(vec![leaf.clone()]).unwrap();
        assert_eq!(tree.root(), leaf);

        let proof = tree.prove(&leaf);
        assert!(proof.included);
        assert!(proof.branch.is_empty());
        assert!(verify(&leaf, &proof.branch, tree.root()));
    }

    #[test]
    fn empty_leaf_set_has_no_tree() {
        assert!(MerkleTree::build(Vec::new()).is_none());
    }

    #[test]
    fn odd_cardinality_duplicates_last_sorted_leaf() {
        let mut three = leaves(3);
        three.sort();
        let last = three.last().unwrap().clone();
        let mut four = three.clone();
        four.push(last);

        let root_three = MerkleTree::build(three).unwrap().root().to_string();
        let root_four = MerkleTree::build(four).unwrap().root().to_string();
        assert_eq!(root_three, root_four);
    }

    #[test]
    fn every_leaf_of_an_asymmetric_tree_proves_inclusion() {
        // Five leaves force a duplicated node at two levels, which exercises
        // both sibling positions in the branch.
        let set = leaves(5);
        let tree = MerkleTree::build(set.clone()).unwrap();

        for leaf in &set {
            let proof = tree.prove(leaf);
            assert!(proof.included);
            assert!(verify(leaf, &proof.branch, tree.root()), "leaf {leaf} failed");
        }
    }

    #[test]
    fn tampered_proof_fails_verification() {
        let set = leaves(4);
        let tree = MerkleTree::build(set.clone()).unwrap();
        let mut proof = tree.prove(&set[1]);

        proof.branch[0].sibling = digest_hex("tampered");
        assert!(!verify(&set[1], &proof.branch, tree.root()));
    }

    #[test]
    fn wrong_leaf_fails_verification() {
        let set = leaves(4);
        let tree = MerkleTree::build(set.clone()).unwrap();
        let proof = tree.prove(&set[1]);

        let outsider = digest_hex("outsider");
        assert!(!verify(&outsider, &proof.branch, tree.root()));
    }

    #[test]
    fn unknown_leaf_is_reported_not_included() {
        let tree = MerkleTree::build(leaves(4)).unwrap();
        let proof = tree.prove(&digest_hex("absent"));
        assert!(!proof.included);
        assert!(proof.branch.is_empty());
    }
}
