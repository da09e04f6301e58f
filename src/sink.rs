use crate::image::Image;
use std::io::{self, Write};

/// Destination for rendered frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Image) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends raw native-endian pixels, frame after frame, to any writer.
pub struct RawFrameWriter<W: Write> {
    out: W,
    frames: usize,
}

impl<W: Write> RawFrameWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, frames: 0 }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameSink for RawFrameWriter<W> {
    fn write_frame(&mut self, frame: &Image) -> io::Result<()> {
        self.out.write_all(frame.as_bytes())?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
