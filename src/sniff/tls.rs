//! TLS SNI (Server Name Indication) parsing
//!
//! Hand-written walk of a TLS `ClientHello` to find the `server_name`
//! extension. Only enough of the handshake is parsed to reach the extension
//! block; anything malformed or truncated yields `None`.
//!
//! ## Record layout
//!
//! ```text
//! ContentType (1) = 0x16        handshake
//! ProtocolVersion (2)
//! Length (2)
//! HandshakeType (1) = 0x01      client_hello
//! Length (3)
//! ProtocolVersion (2)
//! Random (32)
//! SessionID (1 + n)
//! CipherSuites (2 + n)
//! CompressionMethods (1 + n)
//! Extensions (2 + n)            seek type 0x0000 (server_name)
//! ```

/// TLS `ContentType` for handshake records
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;

/// `HandshakeType` for `ClientHello`
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;

/// Extension type `server_name`
const EXT_SERVER_NAME: u16 = 0x0000;

/// `ServerNameType` `host_name`
const SNI_TYPE_HOST_NAME: u8 = 0x00;

/// Minimum TLS record header size
const RECORD_HEADER_SIZE: usize = 5;

/// Byte cursor with checked reads; `None` on any overrun.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }
}

/// Extract the SNI hostname from a TLS `ClientHello`.
///
/// Returns `None` for anything that is not a well-formed `ClientHello`
/// carrying a `host_name` entry; truncated input never panics.
#[must_use]
pub fn sniff_tls_sni(data: &[u8]) -> Option<String> {
    if data.len() < RECORD_HEADER_SIZE || data[0] != CONTENT_TYPE_HANDSHAKE {
        return None;
    }

    let mut cur = Cursor::new(data);

    // Record header: type, version, length
    cur.skip(1)?;
    cur.skip(2)?;
    let record_len = cur.u16()? as usize;
    // Clamp the walk to the record body actually present
    let body = cur.take(record_len.min(data.len() - RECORD_HEADER_SIZE))?;

    let mut hs = Cursor::new(body);
    if hs.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    // Handshake length (3 bytes), then client version + random
    hs.skip(3)?;
    hs.skip(2)?;
    hs.skip(32)?;

    // session_id
    let session_len = hs.u8()? as usize;
    hs.skip(session_len)?;

    // cipher_suites
    let ciphers_len = hs.u16()? as usize;
    hs.skip(ciphers_len)?;

    // compression_methods
    let compression_len = hs.u8()? as usize;
    hs.skip(compression_len)?;

    // extensions
    let ext_total = hs.u16()? as usize;
    let mut ext = Cursor::new(hs.take(ext_total)?);

    while let (Some(ext_type), Some(ext_len)) = (ext.u16(), ext.u16()) {
        let ext_body = ext.take(ext_len as usize)?;
        if ext_type != EXT_SERVER_NAME {
            continue;
        }

        let mut sni = Cursor::new(ext_body);
        let list_len = sni.u16()? as usize;
        let mut list = Cursor::new(sni.take(list_len)?);

        while let Some(name_type) = list.u8() {
            let name_len = list.u16()? as usize;
            let name = list.take(name_len)?;
            if name_type == SNI_TYPE_HOST_NAME {
                // First host_name entry wins
                return std::str::from_utf8(name).ok().map(str::to_string);
            }
        }
        return None;
    }

    None
}
