//! `everest-representers`: text representations of entity state data.
//!
//! A representer turns a collection of member snapshots ([`StateData`]) into
//! a document of some content type and parses such documents back.

pub mod csv;

pub use csv::{CsvData, CsvDialect, CsvError, CsvGenerator, CsvParser, CsvRepresenter};

use everest_core::{DomainError, Shared, StateData, Trackable};

/// Format-specific (de)serializer for collections of members.
pub trait Representer {
    type Error: std::error::Error;

    /// MIME type of the produced documents.
    const CONTENT_TYPE: &'static str;

    fn represent(&self, members: &[StateData]) -> Result<String, Self::Error>;

    fn parse(&self, text: &str) -> Result<Vec<StateData>, Self::Error>;

    /// Represent the public fields of `entities`.
    fn represent_entities<E: Trackable>(
        &self,
        entities: &[Shared<E>],
        private_prefix: &str,
    ) -> Result<String, Self::Error> {
        let members: Vec<StateData> = entities
            .iter()
            .map(|e| e.borrow().state_data().public(private_prefix))
            .collect();
        self.represent(&members)
    }

    /// Parse a document and rebuild one entity per member.
    fn parse_entities<E: Trackable>(&self, text: &str) -> Result<Vec<E>, Self::Error>
    where
        Self::Error: From<DomainError>,
    {
        self.parse(text)?
            .into_iter()
            .map(|data| E::from_state_data(data).map_err(Self::Error::from))
            .collect()
    }
}
