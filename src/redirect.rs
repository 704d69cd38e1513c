use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::trace;
use os_pipe::{PipeReader, PipeWriter};

use crate::ast::PipelineSpec;

/// The unidirectional conduit between stage `i` and stage `i + 1`.
///
/// Both ends are close-on-exec and are released when the channel is
/// dropped, which is how the shell gives them up once every stage has been
/// forked.
#[derive(Debug)]
pub struct PipeChannel {
    reader: PipeReader,
    writer: PipeWriter,
}

impl PipeChannel {
    pub fn read_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub fn write_fd(&self) -> RawFd {
        self.writer.as_raw_fd()
    }
}

/// Allocate the `n_stages - 1` channels a pipeline needs.
///
/// If creation fails partway, the channels made so far are dropped (and
/// their descriptors closed) before the error is returned.
pub fn plan(n_stages: usize) -> io::Result<Vec<PipeChannel>> {
    let count = n_stages.saturating_sub(1);
    let mut channels = Vec::with_capacity(count);
    for _ in 0..count {
        let (reader, writer) = os_pipe::pipe()?;
        trace!(
            "allocated channel {} (r={}, w={})",
            channels.len(),
            reader.as_raw_fd(),
            writer.as_raw_fd()
        );
        channels.push(PipeChannel { reader, writer });
    }
    Ok(channels)
}

/// Where one standard stream of a stage is connected.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamTarget<P> {
    /// Left as inherited from the shell.
    Inherit,
    /// An end of the channel with this index: the read end for stdin, the
    /// write end for stdout.
    Channel(usize),
    /// An external redirection file.
    File(P),
}

impl<P> StreamTarget<P> {
    fn try_map<Q, E>(self, f: impl FnOnce(P) -> Result<Q, E>) -> Result<StreamTarget<Q>, E> {
        Ok(match self {
            StreamTarget::Inherit => StreamTarget::Inherit,
            StreamTarget::Channel(i) => StreamTarget::Channel(i),
            StreamTarget::File(p) => StreamTarget::File(f(p)?),
        })
    }
}

/// The full standard-stream wiring of a single stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageWiring<P> {
    pub stdin: StreamTarget<P>,
    pub stdout: StreamTarget<P>,
    pub stderr: StreamTarget<P>,
}

impl<'a> StageWiring<&'a Path> {
    /// Compute how stage `index` of `spec` is wired.
    ///
    /// Pipes always win for interior edges. External redirections are only
    /// honoured at the pipeline boundary: input on stage 0, output and error
    /// on the last stage. Misplaced redirections are the parser's problem
    /// and are ignored here.
    pub fn for_stage(spec: &'a PipelineSpec, index: usize) -> Self {
        let last = spec.len() - 1;

        let stdin = if index > 0 {
            StreamTarget::Channel(index - 1)
        } else {
            file_or_inherit(spec.input_path.as_deref())
        };
        let stdout = if index < last {
            StreamTarget::Channel(index)
        } else {
            file_or_inherit(spec.output_path.as_deref())
        };
        let stderr = if index == last {
            file_or_inherit(spec.error_path.as_deref())
        } else {
            StreamTarget::Inherit
        };

        StageWiring { stdin, stdout, stderr }
    }

    /// Convert redirection paths to C strings, ready for use after `fork`.
    pub fn to_c_paths(&self) -> Result<StageWiring<CString>, std::ffi::NulError> {
        let to_c = |p: &Path| CString::new(p.as_os_str().as_bytes());
        Ok(StageWiring {
            stdin: self.stdin.clone().try_map(to_c)?,
            stdout: self.stdout.clone().try_map(to_c)?,
            stderr: self.stderr.clone().try_map(to_c)?,
        })
    }
}

fn file_or_inherit(path: Option<&Path>) -> StreamTarget<&Path> {
    path.map_or(StreamTarget::Inherit, StreamTarget::File)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use nix::errno::Errno;
    use nix::fcntl::{FcntlArg, fcntl};

    fn spec(line: &str) -> PipelineSpec {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn plan_allocates_one_channel_per_edge() {
        assert_eq!(plan(1).unwrap().len(), 0);
        assert_eq!(plan(4).unwrap().len(), 3);
    }

    #[test]
    fn dropping_channels_closes_every_end() {
        let channels = plan(3).unwrap();
        let fds: Vec<RawFd> = channels
            .iter()
            .flat_map(|c| [c.read_fd(), c.write_fd()])
            .collect();
        assert_eq!(fds.len(), 4);
        for &fd in &fds {
            assert!(fcntl(fd, FcntlArg::F_GETFD).is_ok());
        }

        drop(channels);
        // Another test may reuse a number concurrently, so only check that
        // not all of them are still open.
        let still_open = fds
            .iter()
            .filter(|&&fd| fcntl(fd, FcntlArg::F_GETFD) != Err(Errno::EBADF))
            .count();
        assert!(still_open < fds.len());
    }

    #[test]
    fn single_stage_inherits_everything() {
        let spec = spec("ls -l");
        let wiring = StageWiring::for_stage(&spec, 0);
        assert_eq!(wiring.stdin, StreamTarget::Inherit);
        assert_eq!(wiring.stdout, StreamTarget::Inherit);
        assert_eq!(wiring.stderr, StreamTarget::Inherit);
    }

    #[test]
    fn single_stage_takes_all_redirections() {
        let spec = spec("sort < in > out 2> err");
        let wiring = StageWiring::for_stage(&spec, 0);
        assert_eq!(wiring.stdin, StreamTarget::File(Path::new("in")));
        assert_eq!(wiring.stdout, StreamTarget::File(Path::new("out")));
        assert_eq!(wiring.stderr, StreamTarget::File(Path::new("err")));
    }

    #[test]
    fn interior_stages_use_adjacent_channels() {
        let spec = spec("cat < in | grep x | sort | uniq > out 2> err");

        let first = StageWiring::for_stage(&spec, 0);
        assert_eq!(first.stdin, StreamTarget::File(Path::new("in")));
        assert_eq!(first.stdout, StreamTarget::Channel(0));
        assert_eq!(first.stderr, StreamTarget::Inherit);

        let middle = StageWiring::for_stage(&spec, 2);
        assert_eq!(middle.stdin, StreamTarget::Channel(1));
        assert_eq!(middle.stdout, StreamTarget::Channel(2));
        assert_eq!(middle.stderr, StreamTarget::Inherit);

        let last = StageWiring::for_stage(&spec, 3);
        assert_eq!(last.stdin, StreamTarget::Channel(2));
        assert_eq!(last.stdout, StreamTarget::File(Path::new("out")));
        assert_eq!(last.stderr, StreamTarget::File(Path::new("err")));
    }

    #[test]
    fn misplaced_redirections_are_never_applied() {
        let mut spec = spec("cat | wc");
        spec.input_path = None;
        spec.output_path = Some("out".into());
        // Hand-built spec: the output path only lands on the last stage.
        let first = StageWiring::for_stage(&spec, 0);
        assert_eq!(first.stdout, StreamTarget::Channel(0));
        let last = StageWiring::for_stage(&spec, 1);
        assert_eq!(last.stdout, StreamTarget::File(Path::new("out")));
    }

    #[test]
    fn c_paths_reject_interior_nul() {
        let mut spec = spec("cat");
        spec.input_path = Some("bad\0name".into());
        assert!(StageWiring::for_stage(&spec, 0).to_c_paths().is_err());

        spec.input_path = Some("good".into());
        let wiring = StageWiring::for_stage(&spec, 0).to_c_paths().unwrap();
        assert_eq!(wiring.stdin, StreamTarget::File(CString::new("good").unwrap()));
    }
}
