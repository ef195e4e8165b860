use sakaki_kvs::EndPointKind;

/// Scan bounds over the coded key space of one index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    begin_key: Vec<u8>,
    begin_kind: EndPointKind,
    end_key: Vec<u8>,
    end_kind: EndPointKind,
}

impl KeyRange {
    pub fn new(
        begin_key: Vec<u8>,
        begin_kind: EndPointKind,
        end_key: Vec<u8>,
        end_kind: EndPointKind,
    ) -> Self {
        Self { begin_key, begin_kind, end_key, end_kind }
    }

    /// The whole index.
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn begin_key(&self) -> &[u8] {
        &self.begin_key
    }

    pub fn begin_kind(&self) -> EndPointKind {
        self.begin_kind
    }

    pub fn end_key(&self) -> &[u8] {
        &self.end_key
    }

    pub fn end_kind(&self) -> EndPointKind {
        self.end_kind
    }
}
