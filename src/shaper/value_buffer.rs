use crate::sql::ScalarValue;

/// One flat result row: the values of the projection, by slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueBuffer(pub Vec<ScalarValue>);

impl ValueBuffer {
    pub fn new(values: Vec<ScalarValue>) -> ValueBuffer {
        ValueBuffer(values)
    }

    pub fn get(&self, index: usize) -> Option<&ScalarValue> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ScalarValue>> for ValueBuffer {
    fn from(values: Vec<ScalarValue>) -> ValueBuffer {
        ValueBuffer(values)
    }
}
