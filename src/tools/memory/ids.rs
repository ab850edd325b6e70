//! Sequential surrogate identifiers.

/// True when `id` is a non-empty run of ASCII digits, i.e. something this
/// generator could have issued.
pub fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// Hands out decimal string ids, each greater than every id seen before.
#[derive(Debug, Default, Clone)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    /// Reset the counter to the highest numeric id in `ids` (0 if none).
    /// Non-numeric legacy ids are ignored.
    pub fn initialize_from<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.last = ids
            .into_iter()
            .filter(|id| is_numeric_id(id))
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
    }

    pub fn next_id(&mut self) -> String {
        self.last += 1;
        self.last.to_string()
    }
}
