//! 以 SSE 推送实时流：首条是全量快照，之后是增量事件

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use coordinator_engine::StreamMessage;
use futures::{Stream, StreamExt};
use tracing::{info, warn};

use crate::{error::ApiResult, extract::CallerIdentity, routes::AppState};

fn to_event(message: StreamMessage) -> Option<Event> {
    let name = match &message {
        StreamMessage::Snapshot(_) => "snapshot",
        StreamMessage::Event(_) => "event",
    };
    match Event::default().event(name).json_data(&message) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "推送消息序列化失败");
            None
        }
    }
}

pub async fn stream(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let messages = state.service.stream(&caller).await?;
    info!(job = %caller.job, user_id = caller.user_id, "客户端已连接实时流");

    let events = messages.filter_map(|message| async move { to_event(message).map(Ok) });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
