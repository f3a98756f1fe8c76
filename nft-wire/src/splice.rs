//! In-place byte surgery on packet buffers.

use bytes::BytesMut;

use crate::Error;

/// Grows `buf` by `len` zeroed bytes inserted at offset `at`, shifting everything from `at`
/// onwards towards the end.
pub fn insert_gap(buf: &mut BytesMut, at: usize, len: usize) -> Result<(), Error> {
    let old_len = buf.len();
    if at > old_len {
        return Err(Error::OutOfBounds { offset: at, len, bound: old_len });
    }

    buf.resize(old_len + len, 0);
    buf.copy_within(at..old_len, at + len);
    buf[at..at + len].fill(0);

    Ok(())
}

/// Moves the `len`-byte window starting at `from` so that it starts at `to`, shifting the bytes
/// in between to close the old gap and open the new one. All bytes outside the window keep their
/// relative order, and the buffer length is unchanged.
///
/// `to` is the window's final offset, so both `from + len` and `to + len` must fit in `buf`.
pub fn move_window(buf: &mut [u8], from: usize, to: usize, len: usize) -> Result<(), Error> {
    let bound = buf.len();
    for offset in [from, to] {
        if offset.checked_add(len).map_or(true, |end| end > bound) {
            return Err(Error::OutOfBounds { offset, len, bound });
        }
    }

    if from < to {
        buf[from..to + len].rotate_left(len);
    } else if from > to {
        buf[to..from + len].rotate_right(len);
    }

    Ok(())
}
