use bytes::Bytes;

use crate::frame::{Frame, CRLF};
use crate::Error;

/// A request ready to be put on the wire: the command name followed by its arguments, all sent as
/// bulk strings.
///
/// Text arguments that are empty are dropped, both from the element count and from the body. Some
/// callers rely on this to omit optional trailing flags (`FLUSHDB ""` is sent as `FLUSHDB`). Use
/// [`Command::raw`] when an argument must be sent even if it is empty.
///
/// The name and text arguments are sent as UTF-8. For any other character set, encode the
/// argument yourself and pass the bytes to [`Command::raw`] (or use
/// [`FrameCodec::encode_bytes`](crate::FrameCodec::encode_bytes)).
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Command {
        Command {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Appends a text argument unless it is empty.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Command {
        let arg = arg.as_ref();
        if !arg.is_empty() {
            self.args.push(Bytes::copy_from_slice(arg.as_bytes()));
        }
        self
    }

    /// Appends an optional text argument unless it is absent or empty.
    pub fn arg_opt<T: AsRef<str>>(self, arg: Option<T>) -> Command {
        match arg {
            Some(arg) => self.arg(arg),
            None => self,
        }
    }

    pub fn args_from<I, T>(self, args: I) -> Command
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    /// Appends a binary argument verbatim, even when it is empty. This is also the path for text
    /// in a character set other than UTF-8.
    pub fn raw(mut self, arg: impl Into<Bytes>) -> Command {
        self.args.push(arg.into());
        self
    }

    pub fn into_frame(self) -> Result<Frame, Error> {
        if self.name.is_empty() {
            return Err(Error::Encoding("command name must not be empty".to_string()));
        }

        let mut frames = Vec::with_capacity(1 + self.args.len());
        frames.push(Frame::Bulk(Bytes::from(self.name)));
        frames.extend(self.args.into_iter().map(Frame::Bulk));

        Ok(Frame::Array(frames))
    }

    /// Serializes the request without building the intermediate frame tree.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        if self.name.is_empty() {
            return Err(Error::Encoding("command name must not be empty".to_string()));
        }

        let mut bytes = Vec::with_capacity(
            16 + self.name.len() + self.args.iter().map(|a| a.len() + 16).sum::<usize>(),
        );
        bytes.push(b'*');
        bytes.extend_from_slice((1 + self.args.len()).to_string().as_bytes());
        bytes.extend_from_slice(CRLF);

        for element in std::iter::once(self.name.as_bytes()).chain(self.args.iter().map(|a| &a[..]))
        {
            bytes.push(b'$');
            bytes.extend_from_slice(element.len().to_string().as_bytes());
            bytes.extend_from_slice(CRLF);
            bytes.extend_from_slice(element);
            bytes.extend_from_slice(CRLF);
        }

        Ok(bytes)
    }
}
