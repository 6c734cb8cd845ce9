use super::CursorState;
use crate::error::{MooringError, Result};

/// Pairs a harvester position with a parser position for one logical stream.
///
/// The parser position is mandatory on every update, and a harvester position
/// can only move together with a parser position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSourceLocation {
    harvester_position: Option<String>,
    parser_position: Option<CursorState>,
}

impl DataSourceLocation {
    pub fn new(harvester_position: Option<String>, parser_position: Option<CursorState>) -> Self {
        Self {
            harvester_position,
            parser_position,
        }
    }

    pub fn harvester_position(&self) -> Option<&str> {
        self.harvester_position.as_deref()
    }

    pub fn parser_position(&self) -> Option<&CursorState> {
        self.parser_position.as_ref()
    }

    /// Update the location.
    ///
    /// `harvester_position: None` keeps the current harvester position.
    pub fn update(
        &mut self,
        parser_position: Option<CursorState>,
        harvester_position: Option<String>,
    ) -> Result<()> {
        let parser_position = parser_position.ok_or_else(|| {
            MooringError::InvalidState(
                "a data source location update requires a parser position".to_string(),
            )
        })?;

        if let Some(harvester_position) = harvester_position {
            self.harvester_position = Some(harvester_position);
        }
        self.parser_position = Some(parser_position);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.harvester_position = None;
        self.parser_position = None;
    }
}
