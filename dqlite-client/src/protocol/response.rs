//! Response decoders, one per response type.
//!
//! Every decoder first turns a Failure response into [`Error::Request`] and
//! rejects any response type other than the one it expects.

use std::time::Duration;

use super::constants::{ClusterFormat, ResponseType, VERSION_LEGACY};
use super::message::Message;
use super::rows::{get_files, File, Rows};
use crate::error::{Error, Result};
use crate::store::{NodeInfo, NodeRole};

/// Result of an Exec or ExecSQL request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub last_insert_id: u64,
    pub rows_affected: u64,
}

/// Prepared statement handle returned by a Prepare request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtInfo {
    pub db: u32,
    pub id: u32,
    pub params: u64,
}

fn expect(response: &mut Message, expected: ResponseType) -> Result<()> {
    let mtype = response.mtype();
    if mtype == u8::from(ResponseType::Failure) && expected != ResponseType::Failure {
        let (code, description) = decode_failure(response)?;
        return Err(Error::Request { code, description });
    }
    if mtype != u8::from(expected) {
        return Err(Error::UnexpectedResponse {
            expected: expected.into(),
            actual: mtype,
        });
    }
    Ok(())
}

/// Reads the code and message of a Failure response.
pub fn decode_failure(response: &mut Message) -> Result<(u64, String)> {
    let code = response.get_u64()?;
    let description = response.get_string()?;
    Ok((code, description))
}

/// Reads the ID and address of the node a server believes is leader.
///
/// An empty address means the server does not know the leader.
pub fn decode_node(response: &mut Message) -> Result<(u64, String)> {
    expect(response, ResponseType::Node)?;
    let id = response.get_u64()?;
    let address = response.get_string()?;
    Ok((id, address))
}

/// Pre-1.0 servers send only the leader address.
pub fn decode_node_legacy(response: &mut Message) -> Result<String> {
    expect(response, ResponseType::Node)?;
    response.get_string()
}

/// Decodes a Node response in the layout matching the session's version.
pub fn decode_node_compat(version: u64, response: &mut Message) -> Result<(u64, String)> {
    if version == VERSION_LEGACY {
        let address = decode_node_legacy(response)?;
        return Ok((0, address));
    }
    decode_node(response)
}

/// Reads the heartbeat timeout the server assigned to this client.
pub fn decode_welcome(response: &mut Message) -> Result<Duration> {
    expect(response, ResponseType::Welcome)?;
    let timeout = response.get_u64()?;
    Ok(Duration::from_millis(timeout))
}

pub fn decode_nodes(response: &mut Message, format: ClusterFormat) -> Result<Vec<NodeInfo>> {
    expect(response, ResponseType::Nodes)?;
    let count = response.get_u64()?;
    let mut nodes = Vec::new();
    for _ in 0..count {
        let id = response.get_u64()?;
        let address = response.get_string()?;
        let role = match format {
            ClusterFormat::V0 => NodeRole::Voter,
            ClusterFormat::V1 => {
                let raw = response.get_u64()?;
                NodeRole::try_from(raw)
                    .map_err(|_| Error::Malformed(format!("invalid node role {raw}")))?
            }
        };
        nodes.push(NodeInfo { id, address, role });
    }
    Ok(nodes)
}

/// Reads the ID of an opened database.
pub fn decode_db(response: &mut Message) -> Result<u32> {
    expect(response, ResponseType::Db)?;
    let id = response.get_u32()?;
    response.get_u32()?;
    Ok(id)
}

pub fn decode_stmt(response: &mut Message) -> Result<StmtInfo> {
    expect(response, ResponseType::Stmt)?;
    Ok(StmtInfo {
        db: response.get_u32()?,
        id: response.get_u32()?,
        params: response.get_u64()?,
    })
}

pub fn decode_result(response: &mut Message) -> Result<ExecResult> {
    expect(response, ResponseType::Result)?;
    Ok(ExecResult {
        last_insert_id: response.get_u64()?,
        rows_affected: response.get_u64()?,
    })
}

pub fn decode_rows(response: &mut Message) -> Result<Rows> {
    expect(response, ResponseType::Rows)?;
    Rows::decode(response)
}

pub fn decode_files(response: &mut Message) -> Result<Vec<File>> {
    expect(response, ResponseType::Files)?;
    get_files(response)
}

pub fn decode_empty(response: &mut Message) -> Result<()> {
    expect(response, ResponseType::Empty)?;
    response.get_u64()?;
    Ok(())
}
