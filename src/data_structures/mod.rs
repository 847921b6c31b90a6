mod id;

pub use id::{HEX_ID_LEN, ID, ID_LEN};
