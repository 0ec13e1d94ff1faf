use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::Status;

use super::proto::{NativeCallReplyItem, NativeCallRequest};

const NATIVE_CALL_PATH: &str = "/emerald.Blockchain/NativeCall";

/// Reply frames of one `NativeCall`, in arrival order.
pub type ReplyStream = BoxStream<'static, Result<NativeCallReplyItem, Status>>;

/// A client able to perform the gateway's server-streaming `NativeCall`.
///
/// [`TonicChannel`] is the network implementation; anything else that
/// speaks the same exchange can be injected through
/// [`GrpcConnectionBuilder::channel`](super::GrpcConnectionBuilder::channel).
#[async_trait]
pub trait NativeCallChannel: Send + Sync {
    async fn native_call(&self, request: NativeCallRequest) -> Result<ReplyStream, Status>;
}

/// `NativeCall` over a `tonic` channel.
#[derive(Clone)]
pub struct TonicChannel {
    grpc: tonic::client::Grpc<Channel>,
}

impl TonicChannel {
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: tonic::client::Grpc::new(channel),
        }
    }
}

#[async_trait]
impl NativeCallChannel for TonicChannel {
    async fn native_call(&self, request: NativeCallRequest) -> Result<ReplyStream, Status> {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("gateway channel not ready: {e}")))?;

        let codec: ProstCodec<NativeCallRequest, NativeCallReplyItem> = ProstCodec::default();
        let response = grpc
            .server_streaming(
                tonic::Request::new(request),
                PathAndQuery::from_static(NATIVE_CALL_PATH),
                codec,
            )
            .await?;
        Ok(response.into_inner().boxed())
    }
}
