//! Inclusive and exclusive bounds on present and absent keys, with caps.

use crate::e2e_tests::helpers::*;
use crate::testing::{TestStorage, fill, value_for};

fn tens() -> Vec<i64> {
    (1..=10).map(|i| i * 10).collect()
}

#[test]
fn test_bounds_on_one_to_ten() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("one-to-ten");
    fill(&tree, 1..=10);
    let values = |keys: &[i64]| keys.iter().map(|k| value_for(*k)).collect::<Vec<_>>();

    assert_eq!(
        tree.get_values_major(&5, true, None).expect("major"),
        values(&[5, 6, 7, 8, 9, 10])
    );
    assert_eq!(
        tree.get_values_major(&5, false, None).expect("major"),
        values(&[6, 7, 8, 9, 10])
    );
    assert_eq!(
        tree.get_values_minor(&5, true, None).expect("minor"),
        values(&[5, 4, 3, 2, 1])
    );
    assert_eq!(
        tree.get_values_between(&3, true, &7, false, None)
            .expect("between"),
        values(&[3, 4, 5, 6])
    );
}

#[test]
fn test_minor_bounds() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("minor");
    fill(&tree, tens());

    let minor = |key: i64, inclusive: bool, cap: Option<usize>| {
        tree.get_values_minor(&key, inclusive, cap)
            .expect("minor")
    };
    let values = |keys: &[i64]| keys.iter().map(|k| value_for(*k)).collect::<Vec<_>>();

    assert_eq!(minor(50, true, None), values(&[50, 40, 30, 20, 10]));
    assert_eq!(minor(50, false, None), values(&[40, 30, 20, 10]));
    assert_eq!(minor(55, true, None), values(&[50, 40, 30, 20, 10]));
    assert_eq!(minor(55, false, None), values(&[50, 40, 30, 20, 10]));
    assert_eq!(minor(10, false, None), values(&[]));
    assert_eq!(minor(5, true, None), values(&[]));
    assert_eq!(minor(500, false, Some(3)), values(&[100, 90, 80]));
    assert_eq!(minor(50, true, Some(2)), values(&[50, 40]));
    assert_eq!(minor(50, true, Some(0)), values(&[]));
}

#[test]
fn test_major_bounds() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("major");
    fill(&tree, tens());

    let major = |key: i64, inclusive: bool, cap: Option<usize>| {
        keys(&tree.get_entries_major(&key, inclusive, cap).expect("major"))
    };

    assert_eq!(major(50, true, None), vec![50, 60, 70, 80, 90, 100]);
    assert_eq!(major(50, false, None), vec![60, 70, 80, 90, 100]);
    assert_eq!(major(55, true, None), vec![60, 70, 80, 90, 100]);
    assert_eq!(major(100, false, None), Vec::<i64>::new());
    assert_eq!(major(100, true, Some(3)), vec![100]);
    assert_eq!(major(0, false, Some(4)), vec![10, 20, 30, 40]);
}

#[test]
fn test_between_bounds() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("between");
    fill(&tree, tens());

    let between = |from: i64, from_inclusive: bool, to: i64, to_inclusive: bool, cap| {
        keys(
            &tree
                .get_entries_between(&from, from_inclusive, &to, to_inclusive, cap)
                .expect("between"),
        )
    };

    assert_eq!(between(20, true, 50, true, None), vec![20, 30, 40, 50]);
    assert_eq!(between(20, false, 50, false, None), vec![30, 40]);
    assert_eq!(between(25, true, 45, true, None), vec![30, 40]);
    assert_eq!(between(25, false, 45, false, None), vec![30, 40]);
    assert_eq!(between(50, true, 50, true, None), vec![50]);
    assert_eq!(between(50, false, 50, true, None), Vec::<i64>::new());
    assert_eq!(between(50, true, 20, true, None), Vec::<i64>::new());
    assert_eq!(between(41, true, 49, true, None), Vec::<i64>::new());
    assert_eq!(between(0, true, 1000, true, Some(3)), vec![10, 20, 30]);
    assert_eq!(between(0, true, 1000, true, Some(0)), Vec::<i64>::new());

    let values = tree
        .get_values_between(&30, true, &40, true, None)
        .expect("values");
    assert_eq!(values, vec![value_for(30), value_for(40)]);
}

#[test]
fn test_bounds_across_many_leaves() {
    let storage = TestStorage::small();
    let tree = storage.long_tree("wide");
    let model: std::collections::BTreeMap<i64, String> =
        (0..400).map(|i| (i * 3, value_for(i * 3))).collect();
    fill(&tree, model.keys().copied());

    for (from, to) in [(0, 1197), (1, 2), (100, 700), (299, 301), (-50, 5), (1190, 5000)] {
        for (from_inclusive, to_inclusive) in [(true, true), (true, false), (false, true), (false, false)] {
            let got = keys(
                &tree
                    .get_entries_between(&from, from_inclusive, &to, to_inclusive, None)
                    .expect("between"),
            );
            let expected = model_keys(&model, |k| {
                (if from_inclusive { k >= from } else { k > from })
                    && (if to_inclusive { k <= to } else { k < to })
            });
            assert_eq!(got, expected, "between {from}..{to} ({from_inclusive}, {to_inclusive})");
        }

        for inclusive in [true, false] {
            let minor = keys(&tree.get_entries_minor(&to, inclusive, None).expect("minor"));
            let mut expected = model_keys(&model, |k| if inclusive { k <= to } else { k < to });
            expected.reverse();
            assert_eq!(minor, expected, "minor {to} ({inclusive})");

            let major = keys(&tree.get_entries_major(&from, inclusive, None).expect("major"));
            let expected = model_keys(&model, |k| if inclusive { k >= from } else { k > from });
            assert_eq!(major, expected, "major {from} ({inclusive})");
        }
    }
    assert_eq!(storage.pinned_pages(), 0);
}
