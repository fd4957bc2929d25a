use std::sync::Arc;

use crate::youtube::MetadataSource;

pub use crate::dj::{notify::EventHub, LobbyManager};

/* ------------ video metadata lookup ------------ */
pub type Metadata = Arc<dyn MetadataSource>;
