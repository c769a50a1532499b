pub mod commit;
pub mod config;
pub mod connection;
pub mod dataset;
mod decode;
pub mod download;
pub mod error;
pub mod types;


pub use commit::{Commit, RemoteCommit};
pub use connection::Connection;
pub use dataset::{Binding, ComponentSource, DatasetBlob, NoComponents, PathComponents, describe};
pub use download::{DownloadOptions, Downloaded};
pub use error::DownloadError;
pub use types::ComponentDescriptor;
