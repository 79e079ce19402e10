//! Demultiplexing of a unit's combined output.

use crate::backend::OutputFrame;

/// Output of a unit split back into its two streams.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Split frames into stdout and stderr buffers, keeping order within each.
///
/// Frames the engine did not tag as stderr count as stdout.
pub fn demux<I>(frames: I) -> CapturedOutput
where
    I: IntoIterator<Item = OutputFrame>,
{
    let mut out = CapturedOutput::default();
    for frame in frames {
        match frame {
            OutputFrame::Stdout(bytes) | OutputFrame::Other(bytes) => {
                out.stdout.extend_from_slice(&bytes);
            }
            OutputFrame::Stderr(bytes) => out.stderr.extend_from_slice(&bytes),
        }
    }
    out
}
