//! Binary entrypoint for the chat relay server.

use std::process::ExitCode;

use chat_relay::start_chat_relay;

fn main() -> ExitCode {
    start_chat_relay::run()
}
