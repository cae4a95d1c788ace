/*!
This module implements the binary format of a `LinearObliviousTree`. All numbers are little endian. Sections are framed by ASCII tags: a tree is

```text
t{ scale:f64 s{ n_splits:i32 } (feature_index:i32 condition_index:i32)* n{ n_leaves:i32 } leaf* }
```

and a leaf is

```text
l{ s{ n_features:u64 } feature_index:i32* weight:f64* leaf_weight:f64 }
```
*/

use crate::{
	grid::Grid,
	tree::{LinearObliviousTree, LinearObliviousTreeLeaf, ObliviousSplit},
};
use num_traits::ToPrimitive;
use std::io::{self, Read, Write};

impl<'g> LinearObliviousTree<'g> {
	pub fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
		writer.write_all(b"t{")?;
		writer.write_all(&self.scale().to_le_bytes())?;
		writer.write_all(b"s{")?;
		writer.write_all(&to_i32(self.splits().len())?.to_le_bytes())?;
		writer.write_all(b"}")?;
		for split in self.splits() {
			writer.write_all(&to_i32(split.feature_index)?.to_le_bytes())?;
			writer.write_all(&to_i32(split.condition_index)?.to_le_bytes())?;
		}
		writer.write_all(b"n{")?;
		writer.write_all(&to_i32(self.leaves().len())?.to_le_bytes())?;
		writer.write_all(b"}")?;
		for leaf in self.leaves() {
			leaf.serialize(writer)?;
		}
		writer.write_all(b"}")?;
		Ok(())
	}

	/// Read a tree written by `serialize`. Returns `None` if the input is truncated, a tag does not match, or the contents do not describe a valid tree for `grid`.
	pub fn deserialize<R: Read>(reader: &mut R, grid: &'g Grid) -> Option<LinearObliviousTree<'g>> {
		expect_tag(reader, b"t{")?;
		let scale = read_f64(reader)?;
		expect_tag(reader, b"s{")?;
		let n_splits = read_i32(reader)?.to_usize()?;
		expect_tag(reader, b"}")?;
		let mut splits = Vec::new();
		for _ in 0..n_splits {
			let feature_index = read_i32(reader)?.to_usize()?;
			let condition_index = read_i32(reader)?.to_usize()?;
			splits.push(ObliviousSplit {
				feature_index,
				condition_index,
			});
		}
		expect_tag(reader, b"n{")?;
		let n_leaves = read_i32(reader)?.to_usize()?;
		expect_tag(reader, b"}")?;
		let mut leaves = Vec::new();
		for _ in 0..n_leaves {
			leaves.push(LinearObliviousTreeLeaf::deserialize(reader)?);
		}
		expect_tag(reader, b"}")?;
		let tree = LinearObliviousTree::new(grid, splits, leaves).ok()?;
		Some(tree.scaled(scale))
	}
}

impl LinearObliviousTreeLeaf {
	pub fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
		let size = self.used_features_in_order().len().to_u64().ok_or_else(too_large)?;
		writer.write_all(b"l{")?;
		writer.write_all(b"s{")?;
		writer.write_all(&size.to_le_bytes())?;
		writer.write_all(b"}")?;
		for feature_index in self.used_features_in_order() {
			writer.write_all(&to_i32(*feature_index)?.to_le_bytes())?;
		}
		for weight in self.weights() {
			writer.write_all(&weight.to_le_bytes())?;
		}
		writer.write_all(&self.weight().to_le_bytes())?;
		writer.write_all(b"}")?;
		Ok(())
	}

	pub fn deserialize<R: Read>(reader: &mut R) -> Option<LinearObliviousTreeLeaf> {
		expect_tag(reader, b"l{")?;
		expect_tag(reader, b"s{")?;
		let size = read_u64(reader)?.to_usize()?;
		expect_tag(reader, b"}")?;
		let mut used_features_in_order = Vec::new();
		for _ in 0..size {
			used_features_in_order.push(read_i32(reader)?.to_usize()?);
		}
		let mut weights = Vec::new();
		for _ in 0..size {
			weights.push(read_f64(reader)?);
		}
		let weight = read_f64(reader)?;
		expect_tag(reader, b"}")?;
		LinearObliviousTreeLeaf::new(used_features_in_order, weights, weight).ok()
	}
}

fn too_large() -> io::Error {
	io::Error::new(
		io::ErrorKind::InvalidInput,
		"the value does not fit in the serialized integer type",
	)
}

fn to_i32(value: usize) -> io::Result<i32> {
	value.to_i32().ok_or_else(too_large)
}

fn expect_tag<R: Read>(reader: &mut R, tag: &[u8]) -> Option<()> {
	let mut buffer = [0u8; 2];
	let buffer = &mut buffer[..tag.len()];
	reader.read_exact(buffer).ok()?;
	if buffer == tag {
		Some(())
	} else {
		None
	}
}

fn read_i32<R: Read>(reader: &mut R) -> Option<i32> {
	let mut buffer = [0u8; 4];
	reader.read_exact(&mut buffer).ok()?;
	Some(i32::from_le_bytes(buffer))
}

fn read_u64<R: Read>(reader: &mut R) -> Option<u64> {
	let mut buffer = [0u8; 8];
	reader.read_exact(&mut buffer).ok()?;
	Some(u64::from_le_bytes(buffer))
}

fn read_f64<R: Read>(reader: &mut R) -> Option<f64> {
	let mut buffer = [0u8; 8];
	reader.read_exact(&mut buffer).ok()?;
	Some(f64::from_le_bytes(buffer))
}

#[cfg(test)]
fn depth_one_tree(grid: &Grid) -> LinearObliviousTree {
	let splits = vec![ObliviousSplit {
		feature_index: 1,
		condition_index: 0,
	}];
	let leaves = vec![
		LinearObliviousTreeLeaf::new(vec![0, 1], vec![0.5, -2.0], 3.0).unwrap(),
		LinearObliviousTreeLeaf::new(vec![0], vec![1.0], 0.0).unwrap(),
	];
	LinearObliviousTree::new(grid, splits, leaves)
		.unwrap()
		.scaled(0.25)
}

#[test]
fn test_round_trip() {
	let grid = Grid::new(vec![vec![], vec![1.0, 2.0]]).unwrap();
	let tree = depth_one_tree(&grid);
	let mut bytes = Vec::new();
	tree.serialize(&mut bytes).unwrap();
	let deserialized = LinearObliviousTree::deserialize(&mut bytes.as_slice(), &grid).unwrap();
	assert_eq!(deserialized, tree);
}

#[test]
fn test_leaf_bytes() {
	let leaf = LinearObliviousTreeLeaf::new(vec![0, 2], vec![1.0, -0.5], 4.0).unwrap();
	let mut bytes = Vec::new();
	leaf.serialize(&mut bytes).unwrap();
	let mut expected = Vec::new();
	expected.extend_from_slice(b"l{s{");
	expected.extend_from_slice(&2u64.to_le_bytes());
	expected.extend_from_slice(b"}");
	expected.extend_from_slice(&0i32.to_le_bytes());
	expected.extend_from_slice(&2i32.to_le_bytes());
	expected.extend_from_slice(&1.0f64.to_le_bytes());
	expected.extend_from_slice(&(-0.5f64).to_le_bytes());
	expected.extend_from_slice(&4.0f64.to_le_bytes());
	expected.extend_from_slice(b"}");
	assert_eq!(bytes, expected);
}

#[test]
fn test_empty_tree_bytes() {
	let grid = Grid::new(vec![vec![]]).unwrap();
	let leaf = LinearObliviousTreeLeaf::new(vec![], vec![], 0.0).unwrap();
	let tree = LinearObliviousTree::new(&grid, vec![], vec![leaf]).unwrap();
	let mut bytes = Vec::new();
	tree.serialize(&mut bytes).unwrap();
	let mut expected = Vec::new();
	expected.extend_from_slice(b"t{");
	expected.extend_from_slice(&1.0f64.to_le_bytes());
	expected.extend_from_slice(b"s{");
	expected.extend_from_slice(&0i32.to_le_bytes());
	expected.extend_from_slice(b"}n{");
	expected.extend_from_slice(&1i32.to_le_bytes());
	expected.extend_from_slice(b"}l{s{");
	expected.extend_from_slice(&0u64.to_le_bytes());
	expected.extend_from_slice(b"}");
	expected.extend_from_slice(&0.0f64.to_le_bytes());
	expected.extend_from_slice(b"}}");
	assert_eq!(bytes, expected);
}

#[test]
fn test_malformed_input() {
	let grid = Grid::new(vec![vec![], vec![1.0, 2.0]]).unwrap();
	let tree = depth_one_tree(&grid);
	let mut bytes = Vec::new();
	tree.serialize(&mut bytes).unwrap();
	for len in 0..bytes.len() {
		assert!(LinearObliviousTree::deserialize(&mut &bytes[..len], &grid).is_none());
	}
	let mut bad_tag = bytes.clone();
	bad_tag[0] = b'x';
	assert!(LinearObliviousTree::deserialize(&mut bad_tag.as_slice(), &grid).is_none());
	// The split refers to a feature the grid does not have.
	let smaller_grid = Grid::new(vec![vec![]]).unwrap();
	assert!(LinearObliviousTree::deserialize(&mut bytes.as_slice(), &smaller_grid).is_none());
}

#[test]
fn test_too_deep_tree() {
	let grid = Grid::new(vec![vec![], vec![1.0]]).unwrap();
	let mut bytes = Vec::new();
	bytes.extend_from_slice(b"t{");
	bytes.extend_from_slice(&1.0f64.to_le_bytes());
	bytes.extend_from_slice(b"s{");
	bytes.extend_from_slice(&64i32.to_le_bytes());
	bytes.extend_from_slice(b"}");
	for _ in 0..64 {
		bytes.extend_from_slice(&1i32.to_le_bytes());
		bytes.extend_from_slice(&0i32.to_le_bytes());
	}
	bytes.extend_from_slice(b"n{");
	bytes.extend_from_slice(&0i32.to_le_bytes());
	bytes.extend_from_slice(b"}}");
	assert!(LinearObliviousTree::deserialize(&mut bytes.as_slice(), &grid).is_none());
}
