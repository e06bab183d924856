//! RPC-shaped request/response types (spec §6), grounded on the JSON
//! schema `vbdev_lvol_rpc.c` registers for its fragmap RPC. The actual RPC
//! transport (a JSON-RPC server dispatching by method name) belongs to the
//! surrounding framework and is out of scope (spec §1); these types are
//! what that transport would serialize.

use serde::{Deserialize, Serialize};

use crate::fragmap::FragmapResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmapRequest {
    pub name: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmapResponse {
    pub cluster_size: u64,
    pub num_clusters: u64,
    pub num_allocated_clusters: u64,
    pub fragmap: String,
}

impl From<FragmapResult> for FragmapResponse {
    fn from(r: FragmapResult) -> Self {
        FragmapResponse {
            cluster_size: r.cluster_size,
            num_clusters: r.num_clusters,
            num_allocated_clusters: r.num_allocated_clusters,
            fragmap: r.fragmap_base64(),
        }
    }
}
