pub mod check;
pub mod entry_ops;
pub mod undo_ops;

pub use entry_ops::{
    InsertPosition, delete_entry_span, insert_entry, move_to_archive, replace_entry_span,
    restore_entry_block,
};
