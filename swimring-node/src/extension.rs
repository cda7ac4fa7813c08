use async_trait::async_trait;

use crate::SwimNode;

#[async_trait]
/// An extension of the base node.
///
/// This can be used to extend a running node with additional functionality,
/// like the request proxy, which wants to use the membership, ring and
/// protocol transport.
pub trait ClusterExtension {
    type Output;
    type Error;

    async fn init_extension(self, node: &SwimNode) -> Result<Self::Output, Self::Error>;
}
