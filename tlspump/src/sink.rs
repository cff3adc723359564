use std::io::{self, Write};

use crate::error::Error;

/// Write all of `buf` to `out`, retrying partial writes.
///
/// A write that reports zero bytes is an error: output streams are not
/// expected to report "no progress". `target` names the destination in the
/// resulting error.
pub fn write_all<W: Write + ?Sized>(
    out: &mut W,
    mut buf: &[u8],
    target: &'static str,
) -> Result<(), Error> {
    while !buf.is_empty() {
        match out.write(buf) {
            Ok(0) => {
                return Err(Error::Write {
                    target,
                    source: io::Error::new(io::ErrorKind::WriteZero, "early EOF"),
                });
            }
            Ok(n) => buf = &buf[n..],
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(Error::Write { target, source }),
        }
    }
    Ok(())
}
