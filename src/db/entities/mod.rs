//! Database entities

pub mod batch_item;
pub mod batch_job;
pub mod channel;
pub mod file_part;
pub mod stored_file;
pub mod transfer_log;

pub use batch_item::Entity as BatchItem;
pub use batch_job::Entity as BatchJob;
pub use channel::Entity as Channel;
pub use file_part::Entity as FilePart;
pub use stored_file::Entity as StoredFile;
pub use transfer_log::Entity as TransferLog;
