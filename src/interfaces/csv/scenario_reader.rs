use crate::error::{EngineError, Result};
use crate::interfaces::simulation::ScenarioStep;
use std::io::Read;

/// Reads scenario steps from a CSV source with an `action,from,to,amount` header.
///
/// Fields are trimmed and the amount column may be left empty or omitted.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes each row. A bad row yields an error and does not
    /// stop the iteration.
    pub fn steps(self) -> impl Iterator<Item = Result<ScenarioStep>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EngineError::from))
    }
}
