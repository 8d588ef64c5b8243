//! Codec binário do formato de rede
//!
//! Inteiros em little-endian e varints no formato compacto do Bitcoin.
//! Todo o estado persistido e todo o material de hash passa por aqui, por
//! isso `encode(decode(x)) == x` é invariante para cada tipo.

use crate::error::DecodeError;

/// Limite defensivo para contagens lidas de varints
const MAX_VAR_COUNT: u64 = 1 << 22;

/// Leitor posicional sobre um buffer de bytes
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes ainda não consumidos
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Posição corrente no buffer
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let slice = self.read_bytes(N)?;
        Ok(slice.try_into().expect("comprimento verificado"))
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Lê um varint compacto
    pub fn read_var_int(&mut self) -> Result<u64, DecodeError> {
        let disc = self.read_u8()?;
        match disc {
            0xff => self.read_u64(),
            0xfe => Ok(u64::from(self.read_u32()?)),
            0xfd => Ok(u64::from(self.read_u16()?)),
            small => Ok(u64::from(small)),
        }
    }

    /// Lê uma contagem de itens, rejeitando valores absurdos
    pub fn read_var_count(&mut self) -> Result<usize, DecodeError> {
        let count = self.read_var_int()?;
        if count > MAX_VAR_COUNT {
            return Err(DecodeError::OversizePayload {
                size: count as usize,
                max: MAX_VAR_COUNT as usize,
            });
        }
        Ok(count as usize)
    }

    /// Lê um buffer prefixado por varint
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_var_count()?;
        Ok(self.read_bytes(len)?.to_vec())
    }
}

pub fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_var_int(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            write_u16(out, value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            write_u32(out, value as u32);
        }
        _ => {
            out.push(0xff);
            write_u64(out, value);
        }
    }
}

pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_var_int(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Tamanho serializado de um varint
#[must_use]
pub const fn var_int_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_int_round_trip() {
        for value in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff] {
            let mut buf = Vec::new();
            write_var_int(&mut buf, value);
            assert_eq!(buf.len(), var_int_len(value));

            let mut cur = Cursor::new(&buf);
            assert_eq!(cur.read_var_int().unwrap(), value);
            assert!(cur.is_empty());
        }
    }

    #[test]
    fn test_var_int_boundary_encodings() {
        let mut buf = Vec::new();
        write_var_int(&mut buf, 0xfc);
        assert_eq!(buf, vec![0xfc]);

        buf.clear();
        write_var_int(&mut buf, 0xfd);
        assert_eq!(buf, vec![0xfd, 0xfd, 0x00]);
    }

    #[test]
    fn test_cursor_eof() {
        let mut cur = Cursor::new(&[1, 2]);
        assert!(cur.read_u32().is_err());
        // a leitura falhada não consome nada além do disponível
        assert_eq!(cur.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_var_count_rejects_absurd_lengths() {
        let mut buf = Vec::new();
        write_var_int(&mut buf, u64::MAX);
        let mut cur = Cursor::new(&buf);
        assert!(matches!(
            cur.read_var_count(),
            Err(DecodeError::OversizePayload { .. })
        ));
    }

    #[test]
    fn test_var_bytes_round_trip() {
        let payload = vec![7u8; 300];
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, &payload);

        let mut cur = Cursor::new(&buf);
        assert_eq!(cur.read_var_bytes().unwrap(), payload);
    }
}
