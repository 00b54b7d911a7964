// Scrollable Results
//
// A cursor over the rows of a select. Rows are read from the driver on
// demand and kept, so the cursor can move backwards and jump to absolute
// positions over a forward-only result set. When the select fetches
// collections, consecutive rows that share a root entity form one logical
// row.

use std::fmt;

use log::{trace, warn};

use crate::exec::error::{ExecError, ExecResult};
use crate::exec::results::finish_consumption;
use crate::exec::row::{DomainValue, FromDomainValue, RowProcessingState, RowReader};
use crate::exec::values::JdbcValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// Cursor over the results of one select
pub struct ScrollableResults<'a, T> {
    values: Option<Box<dyn JdbcValues + 'a>>,
    reader: RowReader,
    state: RowProcessingState<'a>,
    fetching: bool,
    pending: Option<DomainValue>,
    rows: Vec<T>,
    position: Position,
}

impl<'a, T: FromDomainValue> ScrollableResults<'a, T> {
    pub fn new(values: Box<dyn JdbcValues + 'a>, reader: RowReader, state: RowProcessingState<'a>) -> Self {
        let fetching = reader.mapping().has_collection_fetches();
        Self {
            values: Some(values),
            reader,
            state,
            fetching,
            pending: None,
            rows: Vec::new(),
            position: Position::BeforeFirst,
        }
    }

    /// Whether rows are grouped by root entity
    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// Whether the underlying result set is still open
    pub fn is_open(&self) -> bool {
        self.values.is_some()
    }

    fn read_physical(&mut self) -> ExecResult<Option<DomainValue>> {
        let values = match self.values.as_mut() {
            Some(values) => values,
            None => return Ok(None),
        };
        if !values.next()? {
            return Ok(None);
        }
        self.reader.read_row(values.current_row(), &mut self.state).map(Some)
    }

    fn read_logical(&mut self) -> ExecResult<Option<DomainValue>> {
        if !self.fetching {
            return self.read_physical();
        }
        let current = match self.pending.take() {
            Some(value) => value,
            None => match self.read_physical()? {
                Some(value) => value,
                None => return Ok(None),
            },
        };
        let root = current.root_entity_id();
        while let Some(next) = self.read_physical()? {
            if root.is_none() || next.root_entity_id() != root {
                self.pending = Some(next);
                break;
            }
        }
        Ok(Some(current))
    }

    /// Read one more logical row; false once the driver is exhausted
    fn fetch_next(&mut self) -> ExecResult<bool> {
        if self.values.is_none() {
            return Ok(false);
        }
        match self.read_logical() {
            Ok(Some(value)) => {
                self.rows.push(T::from_domain_value(value)?);
                Ok(true)
            }
            Ok(None) => {
                self.finish(Ok(()))?;
                Ok(false)
            }
            Err(e) => {
                self.finish(Err(e))?;
                Ok(false)
            }
        }
    }

    fn finish(&mut self, result: ExecResult<()>) -> ExecResult<()> {
        match self.values.take() {
            Some(mut values) => {
                trace!("Scrollable results exhausted after {} rows", self.rows.len());
                finish_consumption(result, values.as_mut(), &mut self.state)
            }
            None => result,
        }
    }

    fn ensure_row(&mut self, index: usize) -> ExecResult<bool> {
        while self.rows.len() <= index {
            if !self.fetch_next()? {
                break;
            }
        }
        Ok(index < self.rows.len())
    }

    fn load_all(&mut self) -> ExecResult<()> {
        while self.fetch_next()? {}
        Ok(())
    }

    fn move_to(&mut self, index: isize) -> ExecResult<bool> {
        if index < 0 {
            self.position = Position::BeforeFirst;
            return Ok(false);
        }
        let index = index as usize;
        if self.ensure_row(index)? {
            self.position = Position::At(index);
            Ok(true)
        } else {
            self.position = Position::AfterLast;
            Ok(false)
        }
    }

    fn current_index(&mut self) -> ExecResult<isize> {
        Ok(match self.position {
            Position::BeforeFirst => -1,
            Position::At(index) => index as isize,
            Position::AfterLast => {
                self.load_all()?;
                self.rows.len() as isize
            }
        })
    }

    /// Advance to the next row
    pub fn next(&mut self) -> ExecResult<bool> {
        match self.position {
            Position::BeforeFirst => self.move_to(0),
            Position::At(index) => self.move_to(index as isize + 1),
            Position::AfterLast => Ok(false),
        }
    }

    /// Move back to the previous row
    pub fn previous(&mut self) -> ExecResult<bool> {
        let index = self.current_index()?;
        self.move_to(index - 1)
    }

    /// Move `offset` rows from the current position; negative moves back
    pub fn scroll(&mut self, offset: isize) -> ExecResult<bool> {
        let index = self.current_index()?;
        self.move_to(index + offset)
    }

    pub fn first(&mut self) -> ExecResult<bool> {
        self.move_to(0)
    }

    pub fn last(&mut self) -> ExecResult<bool> {
        self.load_all()?;
        match self.rows.len() {
            0 => {
                self.position = Position::AfterLast;
                Ok(false)
            }
            len => {
                self.position = Position::At(len - 1);
                Ok(true)
            }
        }
    }

    pub fn before_first(&mut self) {
        self.position = Position::BeforeFirst;
    }

    pub fn after_last(&mut self) -> ExecResult<()> {
        self.load_all()?;
        self.position = Position::AfterLast;
        Ok(())
    }

    pub fn is_first(&self) -> bool {
        self.position == Position::At(0)
    }

    pub fn is_last(&mut self) -> ExecResult<bool> {
        match self.position {
            Position::At(index) => Ok(!self.ensure_row(index + 1)?),
            _ => Ok(false),
        }
    }

    /// 1-based number of the current row, if the cursor is on a row
    pub fn position(&self) -> Option<usize> {
        match self.position {
            Position::At(index) => Some(index + 1),
            _ => None,
        }
    }

    /// Move to an absolute 1-based row; negative numbers count back from
    /// the last row and zero moves before the first row
    pub fn set_position(&mut self, row: isize) -> ExecResult<bool> {
        if row >= 0 {
            return self.move_to(row - 1);
        }
        self.load_all()?;
        let index = self.rows.len() as isize + row;
        if index < 0 {
            self.position = Position::BeforeFirst;
            return Ok(false);
        }
        self.move_to(index)
    }

    /// Result at the current position
    pub fn get(&self) -> Option<&T> {
        match self.position {
            Position::At(index) => self.rows.get(index),
            _ => None,
        }
    }

    /// Result at the current position, failing when the cursor is not on a
    /// row
    pub fn current(&self) -> ExecResult<&T> {
        self.get()
            .ok_or_else(|| ExecError::Execution("Scrollable results are not positioned on a row".to_string()))
    }

    /// Release the result set. Rows already read stay available.
    pub fn close(&mut self) -> ExecResult<()> {
        match self.values.take() {
            Some(mut values) => values.finish_up(),
            None => Ok(()),
        }
    }
}

impl<T> Drop for ScrollableResults<'_, T> {
    fn drop(&mut self) {
        if let Some(mut values) = self.values.take() {
            if let Err(e) = values.finish_up() {
                warn!("Unable to release scrollable results: {}", e);
            }
        }
    }
}

impl<T> fmt::Debug for ScrollableResults<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrollableResults")
            .field("fetching", &self.fetching)
            .field("rows_read", &self.rows.len())
            .field("position", &self.position)
            .field("open", &self.values.is_some())
            .finish()
    }
}
