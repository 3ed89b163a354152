#![allow(dead_code)]

use amqperf_codec::frame::{
    self, AMQPFrame, BasicCancelOkArgs, BasicConsumeOkArgs, ConnectionStartArgs, ConnectionTuneArgs, MethodFrameArgs,
    QueueDeclareOkArgs, QueueDeleteOkArgs, QueuePurgeOkArgs,
};

pub const FRAME_MAX: u32 = 4096;

/// Replies of a well behaving broker, frames without reply give an empty vec.
pub fn standard_reply(frame: &AMQPFrame) -> Vec<AMQPFrame> {
    match frame {
        AMQPFrame::Header => vec![ConnectionStartArgs::new().frame()],
        AMQPFrame::Method(_, _, MethodFrameArgs::ConnectionStartOk(_)) => vec![ConnectionTuneArgs {
            channel_max: 2047,
            frame_max: FRAME_MAX,
            heartbeat: 0,
        }
        .frame()],
        AMQPFrame::Method(_, _, MethodFrameArgs::ConnectionOpen(_)) => vec![frame::connection_open_ok()],
        AMQPFrame::Method(ch, _, MethodFrameArgs::ChannelOpen) => vec![frame::channel_open_ok(*ch)],
        AMQPFrame::Method(ch, _, MethodFrameArgs::ConfirmSelect(_)) => vec![frame::confirm_select_ok(*ch)],
        AMQPFrame::Method(ch, _, MethodFrameArgs::QueueDeclare(args)) => {
            let name = if args.name.is_empty() {
                "amq.gen-test"
            } else {
                &args.name
            };

            vec![QueueDeclareOkArgs::default().name(name).frame(*ch)]
        }
        AMQPFrame::Method(ch, _, MethodFrameArgs::BasicConsume(args)) => {
            vec![BasicConsumeOkArgs::new(&args.consumer_tag).frame(*ch)]
        }
        AMQPFrame::Method(ch, _, MethodFrameArgs::BasicCancel(args)) => {
            vec![BasicCancelOkArgs::new(&args.consumer_tag).frame(*ch)]
        }
        AMQPFrame::Method(ch, _, MethodFrameArgs::ExchangeDeclare(_)) => vec![frame::exchange_declare_ok(*ch)],
        AMQPFrame::Method(ch, _, MethodFrameArgs::ExchangeDelete(_)) => vec![frame::exchange_delete_ok(*ch)],
        AMQPFrame::Method(ch, _, MethodFrameArgs::QueueBind(_)) => vec![frame::queue_bind_ok(*ch)],
        AMQPFrame::Method(ch, _, MethodFrameArgs::QueueUnbind(_)) => vec![frame::queue_unbind_ok(*ch)],
        AMQPFrame::Method(ch, _, MethodFrameArgs::QueuePurge(_)) => {
            vec![QueuePurgeOkArgs { message_count: 0 }.frame(*ch)]
        }
        AMQPFrame::Method(ch, _, MethodFrameArgs::QueueDelete(_)) => {
            vec![QueueDeleteOkArgs { message_count: 0 }.frame(*ch)]
        }
        AMQPFrame::Method(ch, _, MethodFrameArgs::ChannelClose(_)) => vec![frame::channel_close_ok(*ch)],
        AMQPFrame::Method(0, _, MethodFrameArgs::ConnectionClose(_)) => vec![frame::connection_close_ok()],
        _ => vec![],
    }
}

pub fn is_method(frame: &AMQPFrame, class_method: u32) -> bool {
    matches!(frame, AMQPFrame::Method(_, cm, _) if *cm == class_method)
}

pub fn params() -> amqperf_client::ConnectionParameters {
    amqperf_client::ConnectionParameters {
        heartbeat: 0,
        ..Default::default()
    }
}
