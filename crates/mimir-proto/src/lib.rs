pub mod v1 {
    tonic::include_proto!("mimir.v1");
}

/// Encoded descriptors of every compiled proto file, for gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptor");
