//! Wire messages for the container command protocol.
//!
//! These are the envelopes that travel through the consensus log and the
//! state-machine side channel. The schema is owned by the storage dispatcher;
//! this crate only needs to encode/decode the envelope and a handful of
//! per-command fields, so the messages are maintained as hand-annotated prost
//! structs rather than generated code.

use bytes::Bytes;
use std::collections::HashMap;

/// Command kinds recognized by the container dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CmdType {
    UnknownCmd = 0,
    CreateContainer = 1,
    ReadContainer = 2,
    CloseContainer = 3,
    DeleteContainer = 4,
    PutBlock = 5,
    GetSmallFile = 6,
    PutSmallFile = 7,
    WriteChunk = 8,
    ReadChunk = 9,
    FinalizeBlock = 10,
    StreamInit = 11,
    Echo = 12,
}

impl CmdType {
    /// Read-only commands are served by `query` and never enter the log.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            CmdType::ReadContainer | CmdType::ReadChunk | CmdType::GetSmallFile | CmdType::Echo
        )
    }
}

/// Result codes reported by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ContainerResult {
    UnknownResult = 0,
    Success = 1,
    ContainerNotOpen = 2,
    ClosedContainerIo = 3,
    ChunkFileInconsistency = 4,
    BlockAlreadyFinalized = 5,
    ContainerNotFound = 6,
    BlockNotFound = 7,
    ChunkNotFound = 8,
    IoError = 9,
    UnsupportedRequest = 10,
    ContainerInternalError = 11,
}

/// A block is addressed by its container and a container-local id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct BlockId {
    #[prost(int64, tag = "1")]
    pub container_id: i64,
    #[prost(int64, tag = "2")]
    pub local_id: i64,
    #[prost(int64, tag = "3")]
    pub block_commit_sequence_id: i64,
}

/// Location of one chunk within a block.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChunkInfo {
    #[prost(string, tag = "1")]
    pub chunk_name: String,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(uint64, tag = "3")]
    pub len: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateContainerRequest {
    #[prost(int64, tag = "1")]
    pub container_type: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ReadContainerRequest {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct CloseContainerRequest {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct DeleteContainerRequest {
    #[prost(bool, tag = "1")]
    pub force_delete: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockData {
    #[prost(message, optional, tag = "1")]
    pub block_id: Option<BlockId>,
    #[prost(uint64, tag = "2")]
    pub size: u64,
    #[prost(message, repeated, tag = "3")]
    pub chunks: Vec<ChunkInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutBlockRequest {
    #[prost(message, optional, tag = "1")]
    pub block_data: Option<BlockData>,
    #[prost(bool, tag = "2")]
    pub eof: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSmallFileRequest {
    #[prost(message, optional, tag = "1")]
    pub block_id: Option<BlockId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutSmallFileRequest {
    #[prost(message, optional, tag = "1")]
    pub block: Option<PutBlockRequest>,
    #[prost(message, optional, tag = "2")]
    pub chunk_info: Option<ChunkInfo>,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteChunkRequest {
    #[prost(message, optional, tag = "1")]
    pub block_id: Option<BlockId>,
    #[prost(message, optional, tag = "2")]
    pub chunk_data: Option<ChunkInfo>,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadChunkRequest {
    #[prost(message, optional, tag = "1")]
    pub block_id: Option<BlockId>,
    #[prost(message, optional, tag = "2")]
    pub chunk_data: Option<ChunkInfo>,
    #[prost(uint32, tag = "3")]
    pub read_chunk_version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FinalizeBlockRequest {
    #[prost(message, optional, tag = "1")]
    pub block_id: Option<BlockId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EchoRequest {
    #[prost(bytes = "bytes", tag = "1")]
    pub payload: Bytes,
}

/// The request envelope. `cmd_type` selects which of the optional
/// per-command fields is populated.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerCommandRequest {
    #[prost(enumeration = "CmdType", tag = "1")]
    pub cmd_type: i32,
    #[prost(int64, tag = "2")]
    pub container_id: i64,
    #[prost(string, tag = "3")]
    pub pipeline_id: String,
    #[prost(string, tag = "4")]
    pub trace_id: String,
    #[prost(string, optional, tag = "5")]
    pub encoded_token: Option<String>,
    #[prost(message, optional, tag = "6")]
    pub create_container: Option<CreateContainerRequest>,
    #[prost(message, optional, tag = "7")]
    pub read_container: Option<ReadContainerRequest>,
    #[prost(message, optional, tag = "8")]
    pub close_container: Option<CloseContainerRequest>,
    #[prost(message, optional, tag = "9")]
    pub delete_container: Option<DeleteContainerRequest>,
    #[prost(message, optional, tag = "10")]
    pub put_block: Option<PutBlockRequest>,
    #[prost(message, optional, tag = "11")]
    pub get_small_file: Option<GetSmallFileRequest>,
    #[prost(message, optional, tag = "12")]
    pub put_small_file: Option<PutSmallFileRequest>,
    #[prost(message, optional, tag = "13")]
    pub write_chunk: Option<WriteChunkRequest>,
    #[prost(message, optional, tag = "14")]
    pub read_chunk: Option<ReadChunkRequest>,
    #[prost(message, optional, tag = "15")]
    pub finalize_block: Option<FinalizeBlockRequest>,
    #[prost(message, optional, tag = "16")]
    pub echo: Option<EchoRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadChunkResponse {
    #[prost(message, optional, tag = "1")]
    pub block_id: Option<BlockId>,
    #[prost(message, optional, tag = "2")]
    pub chunk_data: Option<ChunkInfo>,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSmallFileResponse {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,
}

/// The response envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerCommandResponse {
    #[prost(enumeration = "CmdType", tag = "1")]
    pub cmd_type: i32,
    #[prost(enumeration = "ContainerResult", tag = "2")]
    pub result: i32,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(message, optional, tag = "4")]
    pub read_chunk: Option<ReadChunkResponse>,
    #[prost(message, optional, tag = "5")]
    pub get_small_file: Option<GetSmallFileResponse>,
}

impl ContainerCommandResponse {
    pub fn success(cmd_type: CmdType) -> Self {
        ContainerCommandResponse {
            cmd_type: cmd_type as i32,
            result: ContainerResult::Success as i32,
            message: String::new(),
            read_chunk: None,
            get_small_file: None,
        }
    }

    pub fn failure(cmd_type: CmdType, result: ContainerResult, message: impl Into<String>) -> Self {
        ContainerCommandResponse {
            cmd_type: cmd_type as i32,
            result: result as i32,
            message: message.into(),
            read_chunk: None,
            get_small_file: None,
        }
    }
}

/// Snapshot file body: the full container -> BCSID index of one group.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Container2BcsIdMap {
    #[prost(map = "int64, int64", tag = "1")]
    pub container2bcsid: HashMap<i64, i64>,
}
