mod component;
mod digest;

pub use self::component::ComponentDescriptor;
pub use self::digest::{Digest, DigestError};
