//! Numeric constants shared with dqlite servers.
//!
//! These values are fixed by deployed peers and must never change.

/// Current protocol version.
pub const VERSION_ONE: u64 = 1;

/// Version sentinel spoken by pre-1.0 servers.
pub const VERSION_LEGACY: u64 = 0x86104dd760433fe5;

/// Request type codes, written into byte 4 of the frame header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Leader = 0,
    Client = 1,
    Heartbeat = 2,
    Open = 3,
    Prepare = 4,
    Exec = 5,
    Query = 6,
    Finalize = 7,
    ExecSql = 8,
    QuerySql = 9,
    Interrupt = 10,
    Add = 12,
    Assign = 13,
    Remove = 14,
    Dump = 15,
    Cluster = 16,
    Transfer = 17,
}

impl RequestType {
    pub fn from_u8(value: u8) -> Option<Self> {
        let ty = match value {
            0 => Self::Leader,
            1 => Self::Client,
            2 => Self::Heartbeat,
            3 => Self::Open,
            4 => Self::Prepare,
            5 => Self::Exec,
            6 => Self::Query,
            7 => Self::Finalize,
            8 => Self::ExecSql,
            9 => Self::QuerySql,
            10 => Self::Interrupt,
            12 => Self::Add,
            13 => Self::Assign,
            14 => Self::Remove,
            15 => Self::Dump,
            16 => Self::Cluster,
            17 => Self::Transfer,
            _ => return None,
        };
        Some(ty)
    }
}

impl From<RequestType> for u8 {
    fn from(ty: RequestType) -> u8 {
        ty as u8
    }
}

/// Response type codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Failure = 0,
    Node = 1,
    Welcome = 2,
    Nodes = 3,
    Db = 4,
    Stmt = 5,
    Result = 6,
    Rows = 7,
    Empty = 8,
    Files = 9,
}

impl From<ResponseType> for u8 {
    fn from(ty: ResponseType) -> u8 {
        ty as u8
    }
}

/// Column and parameter type tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
    Null = 5,
    UnixTime = 9,
    Iso8601 = 10,
    Boolean = 11,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> Option<Self> {
        let ty = match value {
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::Text,
            4 => Self::Blob,
            5 => Self::Null,
            9 => Self::UnixTime,
            10 => Self::Iso8601,
            11 => Self::Boolean,
            _ => return None,
        };
        Some(ty)
    }

    /// SQL type name reported for a result column.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Null => "NULL",
            Self::UnixTime | Self::Iso8601 => "TIME",
            Self::Boolean => "BOOL",
        }
    }
}

/// Row-header slot announcing that more rows follow in another response.
pub const ROWS_PART: u8 = 0xee;

/// Row-header slot marking the end of the result set.
pub const ROWS_DONE: u8 = 0xff;

/// Layout of the node list returned by a Cluster request.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterFormat {
    /// ID and address only.
    V0 = 0,
    /// ID, address and role.
    V1 = 1,
}
