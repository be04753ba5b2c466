/// Postgres data transmission format.
///
/// Clients specify a format code for each transmitted parameter value and
/// for each column of a query result.
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Text has format code zero.
    ///
    /// In the text transmitted representation, there is no trailing null
    /// character; the text format does not allow embedded nulls.
    Text,
    /// Binary has format code one.
    ///
    /// Binary representations for integers use network byte order (most
    /// significant byte first). Binary representations for complex data
    /// types might change across server versions.
    Binary,
}

impl Format {
    /// Return format code for the current format.
    pub fn format_code(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }

    /// Map a wire format code; anything non zero is binary.
    pub fn from_code(code: i16) -> Format {
        match code {
            0 => Format::Text,
            _ => Format::Binary,
        }
    }
}
