//! End-to-end scenarios against whole trees.
//!
//! Each file covers one scenario using small pages, so that modest key
//! counts already produce multi-level trees and long sibling chains.

#![cfg(test)]

mod helpers;

mod test_composite_keys;
mod test_concurrent_access;
mod test_cursor_resume;
mod test_file_reopen;
mod test_random_operations;
mod test_range_boundaries;
mod test_rollback;
mod test_split_cascade;
