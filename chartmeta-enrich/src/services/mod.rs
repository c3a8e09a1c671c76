//! Service modules for chart enrichment
//!
//! Collaborator interfaces (chart source, metadata lookup, token provider),
//! their network implementations, and the stateful building blocks the
//! pipeline composes (walker, deduplicator, credential manager, enricher).

pub mod chart_source;
pub mod chart_walker;
pub mod credential_manager;
pub mod deduplicator;
pub mod enricher;
pub mod lookup;
pub mod spotify_client;

pub use chart_source::{ChartError, ChartSource, HotHundredArchive};
pub use chart_walker::{ChartWalker, WalkStart};
pub use credential_manager::{Credential, CredentialError, CredentialManager, TokenProvider};
pub use deduplicator::{Deduplicator, SearchRecord};
pub use enricher::{EnrichError, EnrichState, Enricher};
pub use lookup::{LookupError, MetadataLookup};
pub use spotify_client::{ClientCredentialsProvider, SpotifyClient};
