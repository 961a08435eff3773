//! Console progress line for the payload phase.

use std::io::Write;

use tokio::sync::mpsc;

use multiboot_session::Progress;

/// Redraw a single status line until the session drops its sender.
pub async fn render(mut rx: mpsc::UnboundedReceiver<Progress>) {
    let mut stdout = std::io::stdout();
    let mut drawn = false;

    while let Some(progress) = rx.recv().await {
        let _ = write!(stdout, "\r{}", line(&progress));
        let _ = stdout.flush();
        drawn = true;
    }
    if drawn {
        println!();
    }
}

fn line(progress: &Progress) -> String {
    format!(
        "  Sent {} / {} bytes ({:.1}%)",
        progress.sent,
        progress.total,
        progress.percent()
    )
}
