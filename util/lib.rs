/*!
Small utilities shared by the linear tree crates.
*/

pub mod finite;

/**
Zip any number of indexed parallel iterators, so the items of several slices can be visited together in a rayon pass. The calling crate must depend on `rayon`.

```
use linear_tree_util::pzip;
use rayon::prelude::*;
let a = vec![1, 2, 3];
let b = vec![4, 5, 6];
let sums: Vec<i32> = pzip!(&a, &b).map(|(a, b)| a + b).collect();
assert_eq!(sums, vec![5, 7, 9]);
```
*/
#[macro_export]
macro_rules! pzip {
	($($e:expr),* $(,)*) => {
		rayon::iter::IntoParallelIterator::into_par_iter(($($e,)*))
	};
}
