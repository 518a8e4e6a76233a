//! The worker side of the channel: `evald worker` runs this on stdin/stdout.

use evald_protocol::{EvalRequest, FrameTag, WorkerRequest, WorkerResponse, worker::decode_message};
use evald_server::Supervisor;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::frame::{read_frame, write_frame};

/// Answer request frames one at a time until the front end closes the channel.
///
/// The deadline in each request is enforced here, cooperatively, by the
/// supervisor; the front end only steps in if this process stops answering.
pub async fn run_worker<R, W>(
    mut reader: R,
    mut writer: W,
    supervisor: Supervisor,
    max_frame_bytes: usize,
) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("evald worker ready");

    while let Some((header, payload)) = read_frame(&mut reader, max_frame_bytes).await? {
        header.expect(FrameTag::Request)?;
        let request: WorkerRequest = decode_message(&payload)?;
        debug!(
            "worker eval session={:?} timeout={}ms",
            request.session_key, request.timeout_millis
        );

        let output = supervisor
            .run(&EvalRequest {
                timeout_ms: request.timeout_millis,
                session_key: request.session_key.unwrap_or_default(),
                code: request.code,
            })
            .await;

        write_frame(&mut writer, &WorkerResponse { output }.encode()?).await?;
    }

    info!("Front end closed the channel; worker exiting");
    Ok(())
}
