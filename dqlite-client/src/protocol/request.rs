//! Request encoders, one per request type.
//!
//! Each encoder appends the body fields and seals the header. The message
//! must have been reset beforehand.

use super::constants::{ClusterFormat, RequestType};
use super::message::Message;
use super::value::NamedValue;
use crate::store::NodeRole;

pub fn encode_leader(request: &mut Message) {
    request.put_u64(0);
    request.put_header(RequestType::Leader);
}

/// Registers the connecting client under `id`.
pub fn encode_client(request: &mut Message, id: u64) {
    request.put_u64(id);
    request.put_header(RequestType::Client);
}

pub fn encode_heartbeat(request: &mut Message, timestamp: u64) {
    request.put_u64(timestamp);
    request.put_header(RequestType::Heartbeat);
}

pub fn encode_open(request: &mut Message, name: &str, flags: u64, vfs: &str) {
    request.put_string(name);
    request.put_u64(flags);
    request.put_string(vfs);
    request.put_header(RequestType::Open);
}

pub fn encode_prepare(request: &mut Message, db: u64, sql: &str) {
    request.put_u64(db);
    request.put_string(sql);
    request.put_header(RequestType::Prepare);
}

pub fn encode_exec(request: &mut Message, db: u32, stmt: u32, values: &[NamedValue]) {
    request.put_u32(db);
    request.put_u32(stmt);
    request.put_named_values(values);
    request.put_header(RequestType::Exec);
}

pub fn encode_query(request: &mut Message, db: u32, stmt: u32, values: &[NamedValue]) {
    request.put_u32(db);
    request.put_u32(stmt);
    request.put_named_values(values);
    request.put_header(RequestType::Query);
}

pub fn encode_finalize(request: &mut Message, db: u32, stmt: u32) {
    request.put_u32(db);
    request.put_u32(stmt);
    request.put_header(RequestType::Finalize);
}

pub fn encode_exec_sql(request: &mut Message, db: u64, sql: &str, values: &[NamedValue]) {
    request.put_u64(db);
    request.put_string(sql);
    request.put_named_values(values);
    request.put_header(RequestType::ExecSql);
}

pub fn encode_query_sql(request: &mut Message, db: u64, sql: &str, values: &[NamedValue]) {
    request.put_u64(db);
    request.put_string(sql);
    request.put_named_values(values);
    request.put_header(RequestType::QuerySql);
}

pub fn encode_interrupt(request: &mut Message, db: u64) {
    request.put_u64(db);
    request.put_header(RequestType::Interrupt);
}

pub fn encode_add(request: &mut Message, id: u64, address: &str) {
    request.put_u64(id);
    request.put_string(address);
    request.put_header(RequestType::Add);
}

pub fn encode_assign(request: &mut Message, id: u64, role: NodeRole) {
    request.put_u64(id);
    request.put_u64(u64::from(role));
    request.put_header(RequestType::Assign);
}

pub fn encode_remove(request: &mut Message, id: u64) {
    request.put_u64(id);
    request.put_header(RequestType::Remove);
}

pub fn encode_dump(request: &mut Message, name: &str) {
    request.put_string(name);
    request.put_header(RequestType::Dump);
}

pub fn encode_cluster(request: &mut Message, format: ClusterFormat) {
    request.put_u64(format as u64);
    request.put_header(RequestType::Cluster);
}

/// Asks the leader to hand leadership over to node `id`.
pub fn encode_transfer(request: &mut Message, id: u64) {
    request.put_u64(id);
    request.put_header(RequestType::Transfer);
}
