/// A small column-oriented table of numeric cells with explicit missing
/// markers. This is the only in-memory shape the streaming passes ever
/// see: one `Frame` per row group, dropped before the next group is read.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from (name, cells) pairs. All columns must have the
    /// same length; this is enforced by the first column pushed.
    pub fn from_columns<I, S>(cols: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<Option<f64>>)>,
        S: Into<String>,
    {
        let mut frame = Self::new();
        for (name, cells) in cols {
            frame.push_column(name.into(), cells);
        }
        frame
    }

    pub fn push_column(&mut self, name: String, cells: Vec<Option<f64>>) {
        if let Some(first) = self.columns.first() {
            assert_eq!(
                first.len(),
                cells.len(),
                "column `{}` has {} rows, frame has {}",
                name,
                cells.len(),
                first.len()
            );
        }
        self.names.push(name);
        self.columns.push(cells);
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Restrict to the named columns, in the requested order. Columns not
    /// present in the frame are silently absent from the projection; the
    /// transform reports those as [`crate::PipelineError::MissingColumn`].
    pub fn project(&self, columns: &[String]) -> Frame {
        let mut out = Frame::new();
        for name in columns {
            if let Some(cells) = self.column(name) {
                out.push_column(name.clone(), cells.to_vec());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_preserves_requested_order() {
        let frame = Frame::from_columns([
            ("a", vec![Some(1.0), Some(2.0)]),
            ("b", vec![None, Some(4.0)]),
        ]);
        let proj = frame.project(&["b".into(), "a".into()]);
        assert_eq!(proj.column("b"), Some(&[None, Some(4.0)][..]));
        assert_eq!(proj.column("a"), Some(&[Some(1.0), Some(2.0)][..]));
        assert_eq!(proj.num_rows(), 2);
    }

    #[test]
    fn missing_column_is_dropped_from_projection() {
        let frame = Frame::from_columns([("a", vec![Some(1.0)])]);
        let proj = frame.project(&["a".into(), "ghost".into()]);
        assert!(proj.column("ghost").is_none());
    }
}
