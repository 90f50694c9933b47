use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyTranscriptError {
    #[error("clipboard error: {0}")]
    Clipboard(String),

    #[error("nothing to copy: conversation is empty")]
    Empty,
}

/// Whether copying blocks until another application takes over the selection.
///
/// X11 and Wayland serve clipboard contents from the owning process, so a CLI that
/// exits right after `set_text` takes the text with it unless a clipboard manager runs.
pub fn clipboard_waits_for_paste() -> bool {
    cfg!(target_os = "linux")
}

pub fn copy_transcript_to_clipboard(transcript: &str) -> Result<(), CopyTranscriptError> {
    if transcript.trim().is_empty() {
        return Err(CopyTranscriptError::Empty);
    }

    let mut clipboard = arboard::Clipboard::new()
        .map_err(|error| CopyTranscriptError::Clipboard(error.to_string()))?;
    write_text(&mut clipboard, transcript)
        .map_err(|error| CopyTranscriptError::Clipboard(error.to_string()))?;
    tracing::debug!(bytes = transcript.len(), "copied transcript to clipboard");
    Ok(())
}

#[cfg(target_os = "linux")]
fn write_text(clipboard: &mut arboard::Clipboard, text: &str) -> Result<(), arboard::Error> {
    use arboard::SetExtLinux;

    clipboard.set().wait().text(text.to_string())
}

#[cfg(not(target_os = "linux"))]
fn write_text(clipboard: &mut arboard::Clipboard, text: &str) -> Result<(), arboard::Error> {
    clipboard.set_text(text.to_string())
}
