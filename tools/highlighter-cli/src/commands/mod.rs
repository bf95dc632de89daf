pub mod check;
pub mod cut;
pub mod detect;
pub mod export;
pub mod sprite;
pub mod update;

use highlighter_common::cancel::CancelToken;

/// A token cancelled on Ctrl-C.
pub fn ctrl_c_token() -> CancelToken {
    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            trigger.cancel();
        }
    });
    token
}
