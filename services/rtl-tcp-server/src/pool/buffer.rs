//! Lazily grown, typed sample buffer
//!
//! A buffer owns exactly one backing store whose element type is fixed at
//! construction. Storage only ever grows (exact fit, no geometric
//! over-allocation) and is reused across fills to avoid per-callback
//! allocation on the sample path.
//!
//! Allocation failure aborts the process, same as any `Vec` growth.

/// Element type of a buffer's backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Int,
    Float,
    Short,
    UShort,
}

/// The single active backing store
#[derive(Debug)]
enum SampleStore {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
}

impl SampleStore {
    fn empty(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Int => Self::Int(Vec::new()),
            ElementKind::Float => Self::Float(Vec::new()),
            ElementKind::Short => Self::Short(Vec::new()),
            ElementKind::UShort => Self::UShort(Vec::new()),
        }
    }

    /// Grow to exactly `len` elements (never shrinks)
    fn grow_to(&mut self, len: usize) {
        match self {
            Self::Int(v) => grow_exact(v, len, 0),
            Self::Float(v) => grow_exact(v, len, 0.0),
            Self::Short(v) => grow_exact(v, len, 0),
            Self::UShort(v) => grow_exact(v, len, 0),
        }
    }

    fn zero(&mut self, len: usize) {
        match self {
            Self::Int(v) => v[..len].fill(0),
            Self::Float(v) => v[..len].fill(0.0),
            Self::Short(v) => v[..len].fill(0),
            Self::UShort(v) => v[..len].fill(0),
        }
    }

    fn free(&mut self) {
        match self {
            Self::Int(v) => *v = Vec::new(),
            Self::Float(v) => *v = Vec::new(),
            Self::Short(v) => *v = Vec::new(),
            Self::UShort(v) => *v = Vec::new(),
        }
    }
}

fn grow_exact<T: Copy>(v: &mut Vec<T>, len: usize, fill: T) {
    if v.len() < len {
        v.reserve_exact(len - v.len());
        v.resize(len, fill);
    }
}

/// Reusable typed buffer with explicit lifecycle
#[derive(Debug)]
pub struct ElasticBuffer {
    kind: ElementKind,
    store: SampleStore,
    /// Max elements ever allocated
    capacity: usize,
    /// Elements currently holding meaningful data
    valid_length: usize,
    /// Bytes written back by `write_le_bytes`; may end mid-element
    byte_length: usize,
    clear_on_next_use: bool,
    allocated: bool,
}

impl ElasticBuffer {
    /// Create an empty buffer. No backing allocation happens until the
    /// first `prepare`, and that first `prepare` zero-fills.
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            store: SampleStore::empty(kind),
            capacity: 0,
            valid_length: 0,
            byte_length: 0,
            clear_on_next_use: true,
            allocated: false,
        }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn valid_length(&self) -> usize {
        self.valid_length
    }

    /// Whether a backing store is currently allocated
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Make room for `length` elements and mark them valid.
    ///
    /// Non-positive lengths just invalidate the contents.
    pub fn prepare(&mut self, length: isize) {
        if length <= 0 {
            self.valid_length = 0;
            self.byte_length = 0;
            return;
        }
        let length = length as usize;

        if length > self.capacity {
            self.store.grow_to(length);
            self.capacity = length;
            self.allocated = true;
        }

        self.valid_length = length;
        self.byte_length = length * 2;
        if self.clear_on_next_use {
            self.store.zero(self.valid_length);
            self.clear_on_next_use = false;
        }
    }

    /// Zero-fill on the next `prepare`
    pub fn mark_clear_on_next_use(&mut self) {
        self.clear_on_next_use = true;
    }

    /// Free the backing store. Safe to call repeatedly.
    pub fn release(&mut self) {
        if !self.allocated {
            return;
        }
        self.store.free();
        self.capacity = 0;
        self.valid_length = 0;
        self.byte_length = 0;
        self.allocated = false;
    }

    pub fn as_int(&self) -> Option<&[i32]> {
        match &self.store {
            SampleStore::Int(v) => Some(&v[..self.valid_length]),
            _ => None,
        }
    }

    pub fn as_int_mut(&mut self) -> Option<&mut [i32]> {
        let len = self.valid_length;
        match &mut self.store {
            SampleStore::Int(v) => Some(&mut v[..len]),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&[f32]> {
        match &self.store {
            SampleStore::Float(v) => Some(&v[..self.valid_length]),
            _ => None,
        }
    }

    pub fn as_float_mut(&mut self) -> Option<&mut [f32]> {
        let len = self.valid_length;
        match &mut self.store {
            SampleStore::Float(v) => Some(&mut v[..len]),
            _ => None,
        }
    }

    pub fn as_short(&self) -> Option<&[i16]> {
        match &self.store {
            SampleStore::Short(v) => Some(&v[..self.valid_length]),
            _ => None,
        }
    }

    pub fn as_short_mut(&mut self) -> Option<&mut [i16]> {
        let len = self.valid_length;
        match &mut self.store {
            SampleStore::Short(v) => Some(&mut v[..len]),
            _ => None,
        }
    }

    pub fn as_ushort(&self) -> Option<&[u16]> {
        match &self.store {
            SampleStore::UShort(v) => Some(&v[..self.valid_length]),
            _ => None,
        }
    }

    pub fn as_ushort_mut(&mut self) -> Option<&mut [u16]> {
        let len = self.valid_length;
        match &mut self.store {
            SampleStore::UShort(v) => Some(&mut v[..len]),
            _ => None,
        }
    }

    /// Pack raw bytes as little-endian u16 pairs (UShort buffers only).
    ///
    /// A trailing odd byte goes into the low half of the last element and
    /// only that byte is written back. Returns the number of bytes stored.
    pub fn fill_from_bytes(&mut self, bytes: &[u8]) -> usize {
        if self.kind != ElementKind::UShort {
            return 0;
        }
        self.prepare(bytes.len().div_ceil(2) as isize);
        if let Some(dst) = self.as_ushort_mut() {
            for (slot, pair) in dst.iter_mut().zip(bytes.chunks(2)) {
                *slot = u16::from_le_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]);
            }
        }
        self.byte_length = bytes.len();
        bytes.len()
    }

    /// Append the valid region to `out` as little-endian bytes
    /// (UShort buffers only).
    pub fn write_le_bytes(&self, out: &mut Vec<u8>) {
        if let Some(src) = self.as_ushort() {
            let end = out.len() + self.byte_length;
            out.reserve(src.len() * 2);
            for v in src {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.truncate(end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_has_no_storage() {
        let buf = ElasticBuffer::new(ElementKind::Float);
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.valid_length(), 0);
        assert!(!buf.is_allocated());
        assert_eq!(buf.as_float().unwrap().len(), 0);
    }

    #[test]
    fn test_prepare_grows_exactly() {
        let mut buf = ElasticBuffer::new(ElementKind::Int);
        buf.prepare(10);
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.valid_length(), 10);

        // Smaller request keeps capacity
        buf.prepare(4);
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.valid_length(), 4);

        buf.prepare(17);
        assert_eq!(buf.capacity(), 17);
    }

    #[test]
    fn test_non_positive_prepare_invalidates() {
        let mut buf = ElasticBuffer::new(ElementKind::Short);
        buf.prepare(8);
        buf.prepare(0);
        assert_eq!(buf.valid_length(), 0);
        assert_eq!(buf.capacity(), 8);
        buf.prepare(-3);
        assert_eq!(buf.valid_length(), 0);
    }

    #[test]
    fn test_clear_flag_zeroes_once() {
        let mut buf = ElasticBuffer::new(ElementKind::UShort);
        buf.prepare(4);
        buf.as_ushort_mut().unwrap().copy_from_slice(&[1, 2, 3, 4]);

        // Flag was consumed by the first prepare, contents survive
        buf.prepare(4);
        assert_eq!(buf.as_ushort().unwrap(), &[1, 2, 3, 4]);

        buf.mark_clear_on_next_use();
        buf.prepare(4);
        assert_eq!(buf.as_ushort().unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut buf = ElasticBuffer::new(ElementKind::Int);
        buf.prepare(32);
        buf.release();
        assert!(!buf.is_allocated());
        assert_eq!(buf.capacity(), 0);
        buf.release();
        assert!(!buf.is_allocated());

        // Usable again after release
        buf.prepare(2);
        assert_eq!(buf.as_int().unwrap().len(), 2);
    }

    #[test]
    fn test_wrong_kind_accessors() {
        let mut buf = ElasticBuffer::new(ElementKind::Float);
        buf.prepare(2);
        assert!(buf.as_int().is_none());
        assert!(buf.as_ushort().is_none());
        assert_eq!(buf.fill_from_bytes(&[1, 2]), 0);
    }

    #[test]
    fn test_byte_packing() {
        let mut buf = ElasticBuffer::new(ElementKind::UShort);
        let stored = buf.fill_from_bytes(&[0x7f, 0x80, 0x01, 0x02]);
        assert_eq!(stored, 4);
        assert_eq!(buf.as_ushort().unwrap(), &[0x807f, 0x0201]);

        let mut out = Vec::new();
        buf.write_le_bytes(&mut out);
        assert_eq!(out, vec![0x7f, 0x80, 0x01, 0x02]);
    }

    #[test]
    fn test_odd_byte_count_written_back_exactly() {
        let mut buf = ElasticBuffer::new(ElementKind::UShort);
        assert_eq!(buf.fill_from_bytes(&[0x7f, 0x80, 0x01, 0x02, 0xff]), 5);
        assert_eq!(buf.as_ushort().unwrap(), &[0x807f, 0x0201, 0x00ff]);

        let mut out = vec![0xaa];
        buf.write_le_bytes(&mut out);
        assert_eq!(out, vec![0xaa, 0x7f, 0x80, 0x01, 0x02, 0xff]);

        // reused buffer with a shorter odd chunk
        assert_eq!(buf.fill_from_bytes(&[0x03]), 1);
        out.clear();
        buf.write_le_bytes(&mut out);
        assert_eq!(out, vec![0x03]);

        // plain prepare covers whole elements again
        buf.prepare(2);
        out.clear();
        buf.write_le_bytes(&mut out);
        assert_eq!(out.len(), 4);
    }
}
