//! [`Rc4Cipher`]: a symmetric RC4 stream-cipher handler, keyed by the MD5
//! digest of a configured passphrase.
//!
//! # 设计背景（Why）
//! - 镜像 `examples/original_source/handler/encryption_rc4.go`：因为 RC4 的 XOR
//!   密钥流是自逆的，入站解密和出站加密复用同一个 `xor_in_place` 过程，唯一的区别
//!   是各自操作哪种缓冲（`ReadOnlyBuffer`/`WriteOnlyBuffer`）。`rc4` 本身没有值得
//!   拉一个 crate 的复杂度（核心只是 KSA + PRGA 两个数组操作），但 MD5 摘要复用
//!   `md-5`——这是 Cargo.toml 里已经选定的 teacher 依赖，而不是手写哈希。
//! - handler 原地修改缓冲内容（`bytes_mut`），这依赖缓冲的零拷贝契约：拿到的可变
//!   视图在下一次改变该缓冲的调用之前必须保持有效，由借用检查器静态保证。

use std::sync::Mutex;

use md5::{Digest, Md5};

use crate::error::SluiceError;
use crate::pipeline::{Context, InboundHandler, OutboundHandler, PipelineMessage};

/// A single RC4 keystream generator, implementing the classic KSA + PRGA.
struct Rc4State {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4State {
    fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (idx, slot) in s.iter_mut().enumerate() {
            *slot = idx as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256usize {
            j = j
                .wrapping_add(s[i])
                .wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Rc4State { s, i: 0, j: 0 }
    }

    /// XORs `data` in place with the next `data.len()` keystream bytes.
    /// Self-inverse: the same call decrypts what a prior call encrypted,
    /// since `c XOR k XOR k == c`.
    fn xor_in_place(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s[(self.s[self.i as usize].wrapping_add(self.s[self.j as usize])) as usize];
            *byte ^= k;
        }
    }
}

/// Encrypts outbound payloads and decrypts inbound ones with RC4, keyed by the
/// MD5 digest of `key`. Install after framing/codec handlers so it only ever
/// touches the already-isolated message payload, matching the original's
/// placement just inside the length-prefix handler.
///
/// # 契约说明（What）
/// - Inbound: XORs `ReadOnlyBuffer` contents in place, then propagates unchanged.
/// - Outbound: XORs `Raw`/`WriteOnlyBuffer` contents in place, then propagates.
///   Other message shapes fire [`SluiceError::UnsupportedType`].
pub struct Rc4Cipher {
    state: Mutex<Rc4State>,
}

impl Rc4Cipher {
    pub fn new(key: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        Rc4Cipher {
            state: Mutex::new(Rc4State::new(&digest)),
        }
    }
}

impl InboundHandler for Rc4Cipher {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        match msg {
            PipelineMessage::ReadView(shared) => {
                self.state.lock().unwrap().xor_in_place(shared.lock().bytes_mut());
                ctx.fire_read(PipelineMessage::ReadView(shared));
            }
            other => ctx.fire_error(SluiceError::unsupported(format!(
                "Rc4Cipher.on_read expected ReadView, got {other:?}"
            ))),
        }
    }
}

impl OutboundHandler for Rc4Cipher {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        match msg {
            PipelineMessage::Raw(mut bytes) => {
                self.state.lock().unwrap().xor_in_place(&mut bytes);
                ctx.fire_write(PipelineMessage::Raw(bytes));
            }
            PipelineMessage::WriteView(mut buf) => {
                self.state.lock().unwrap().xor_in_place(buf.bytes_mut());
                ctx.fire_write(PipelineMessage::WriteView(buf));
            }
            other => ctx.fire_error(SluiceError::unsupported(format!(
                "Rc4Cipher.on_write expected Raw or WriteView, got {other:?}"
            ))),
        }
    }
}
