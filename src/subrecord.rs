use crate::datatypes::{read_u16, read_u32};
use crate::utils::EspError;
use std::fmt;
use std::io::{Cursor, Read};

/// 4字节子记录/记录签名
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(pub [u8; 4]);

impl Signature {
    pub const XXXX: Signature = Signature(*b"XXXX");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<&[u8; 4]> for Signature {
    fn from(bytes: &[u8; 4]) -> Self {
        Signature(*bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

/// 子记录视图（借用记录数据）
#[derive(Debug, Clone, Copy)]
pub struct SubrecordRef<'a> {
    pub signature: Signature,
    pub data: &'a [u8],
}

/// 子记录流读取器
///
/// 处理两种头部约定：
/// - 普通子记录：4字节签名 + 2字节大小
/// - `XXXX` 扩展：其4字节负载给出下一个子记录的真实大小（下一个头部中的大小字段被忽略）
///
/// 记录末尾不足一个头部的 NULL 填充字节会被安全跳过。
pub struct SubrecordReader<'a> {
    cursor: Cursor<&'a [u8]>,
    data: &'a [u8],
}

impl<'a> SubrecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            data,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.cursor.position() as usize
    }

    fn read_header(&mut self) -> Result<(Signature, u16), EspError> {
        let mut type_bytes = [0u8; 4];
        self.cursor.read_exact(&mut type_bytes)?;
        let size = read_u16(&mut self.cursor)?;
        Ok((Signature(type_bytes), size))
    }

    fn take(&mut self, signature: Signature, size: usize) -> Result<SubrecordRef<'a>, EspError> {
        let start = self.cursor.position() as usize;
        if start + size > self.data.len() {
            return Err(EspError::InvalidFormat(format!(
                "Insufficient data for subrecord {}: expected {} bytes, {} available",
                signature, size, self.data.len() - start
            )));
        }
        self.cursor.set_position((start + size) as u64);
        Ok(SubrecordRef {
            signature,
            data: &self.data[start..start + size],
        })
    }

    fn next_subrecord(&mut self) -> Result<Option<SubrecordRef<'a>>, EspError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        // 子记录最小头部大小为 6 字节 (4字节类型 + 2字节大小)
        if remaining < 6 {
            let tail = &self.data[self.data.len() - remaining..];
            if tail.iter().all(|&b| b == 0) {
                tracing::debug!(bytes = remaining, "skipping NULL padding after last subrecord");
                self.cursor.set_position(self.data.len() as u64);
                return Ok(None);
            }
            return Err(EspError::InvalidFormat(format!(
                "记录末尾有 {} 字节非 NULL 数据，无法解析为子记录: {:02X?}",
                remaining, tail
            )));
        }

        let (signature, size) = self.read_header()?;
        if signature != Signature::XXXX {
            return self.take(signature, size as usize).map(Some);
        }

        if size != 4 {
            return Err(EspError::InvalidFormat(format!(
                "XXXX subrecord must carry 4 bytes, found {}", size
            )));
        }
        let real_size = read_u32(&mut self.cursor)? as usize;
        if self.remaining() < 6 {
            return Err(EspError::InvalidFormat(
                "XXXX subrecord is not followed by a subrecord header".to_string(),
            ));
        }
        let (signature, _ignored) = self.read_header()?;
        self.take(signature, real_size).map(Some)
    }
}

impl<'a> Iterator for SubrecordReader<'a> {
    type Item = Result<SubrecordRef<'a>, EspError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_subrecord() {
            Ok(Some(sub)) => Some(Ok(sub)),
            Ok(None) => None,
            Err(e) => {
                // 出错后停止迭代
                self.cursor.set_position(self.data.len() as u64);
                Some(Err(e))
            }
        }
    }
}

/// 写入一个子记录（负载超过 65535 字节时先写入 `XXXX`）
pub fn write_subrecord(output: &mut Vec<u8>, signature: Signature, data: &[u8]) {
    if data.len() > u16::MAX as usize {
        output.extend_from_slice(Signature::XXXX.as_bytes());
        output.extend_from_slice(&4u16.to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(signature.as_bytes());
        output.extend_from_slice(&0u16.to_le_bytes());
    } else {
        output.extend_from_slice(signature.as_bytes());
        output.extend_from_slice(&(data.len() as u16).to_le_bytes());
    }
    output.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>, EspError> {
        SubrecordReader::new(data)
            .map(|r| r.map(|s| (s.signature.to_string(), s.data.to_vec())))
            .collect()
    }

    /// 测试 1 字节 NULL 填充
    #[test]
    fn test_null_padding_1byte() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            0x00,
        ];

        let subrecords = collect(&data).unwrap();
        assert_eq!(subrecords.len(), 1, "应该解析出 1 个子记录");
        assert_eq!(subrecords[0].0, "EDID");
    }

    /// 测试多个子记录 + 填充
    #[test]
    fn test_multiple_subrecords_with_padding() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            b'F', b'U', b'L', b'L', 0x05, 0x00,
            b'S', b'w', b'o', b'r', b'd',
            0x00, 0x00,
        ];

        assert_eq!(collect(&data).unwrap().len(), 2, "应该解析出 2 个子记录");
    }

    /// 测试非 NULL 的无效尾部数据应该报错
    #[test]
    fn test_invalid_trailing_data() {
        let data = vec![
            b'E', b'D', b'I', b'D', 0x04, 0x00,
            b't', b'e', b's', b't',
            0xFF, 0xAA,
        ];

        let err_msg = collect(&data).unwrap_err().to_string();
        assert!(err_msg.contains("非 NULL 数据"), "错误信息应包含'非 NULL 数据'");
    }

    #[test]
    fn test_truncated_payload() {
        let data = vec![b'D', b'A', b'T', b'A', 0x08, 0x00, 1, 2, 3];
        assert!(collect(&data).is_err());
    }

    #[test]
    fn test_xxxx_extended_size() {
        let payload = vec![7u8; 70_000];
        let mut out = Vec::new();
        write_subrecord(&mut out, Signature(*b"NVMI"), &payload);
        write_subrecord(&mut out, Signature(*b"EDID"), b"x\0");

        assert_eq!(&out[..4], b"XXXX");
        let subrecords = collect(&out).unwrap();
        assert_eq!(subrecords.len(), 2);
        assert_eq!(subrecords[0].0, "NVMI");
        assert_eq!(subrecords[0].1.len(), 70_000);
        assert_eq!(subrecords[1].1, b"x\0");
    }
}
