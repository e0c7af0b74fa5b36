use byteorder::{ByteOrder, LittleEndian};

/// Little-endian reader over a record or footer.  Reads past the end return `None`
/// instead of panicking, flash contents are never trusted.
pub struct Cursor<'a> {
    inner: &'a [u8],
    pos: usize,
}

pub struct CursorMut<'a> {
    inner: &'a mut [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub const fn new(inner: &'a [u8]) -> Cursor<'a> {
        Cursor { pos: 0, inner }
    }
    pub const fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.inner.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(bytes)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }
    pub fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|b| b == 1)
    }
    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(LittleEndian::read_u16)
    }
    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(LittleEndian::read_u32)
    }
}

impl<'a> CursorMut<'a> {
    pub fn new(inner: &'a mut [u8]) -> CursorMut<'a> {
        CursorMut { pos: 0, inner }
    }
    pub const fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Option<&mut [u8]> {
        let start = self.pos;
        let bytes = self.inner.get_mut(start..start + n)?;
        self.pos += n;
        Some(bytes)
    }

    pub fn write_u8(&mut self, value: u8) -> Option<()> {
        self.take(1).map(|b| b[0] = value)
    }
    pub fn write_bool(&mut self, value: bool) -> Option<()> {
        self.write_u8(u8::from(value))
    }
    pub fn write_u16(&mut self, value: u16) -> Option<()> {
        self.take(2).map(|b| LittleEndian::write_u16(b, value))
    }
    pub fn write_u32(&mut self, value: u32) -> Option<()> {
        self.take(4).map(|b| LittleEndian::write_u32(b, value))
    }
}
