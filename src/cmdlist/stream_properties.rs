use neo_dispatch_core::descriptor::ThreadArbitrationPolicy;

/// A tracked state value, `-1` while unknown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamProperty {
    pub value: i32,
    pub is_dirty: bool,
}

impl Default for StreamProperty {
    fn default() -> Self {
        Self {
            value: -1,
            is_dirty: false,
        }
    }
}

impl StreamProperty {
    /// Updates the value, marking it dirty on change. `-1` is ignored.
    pub fn set(&mut self, value: i32) {
        if value != -1 && value != self.value {
            self.value = value;
            self.is_dirty = true;
        }
    }
    pub fn is_set(&self) -> bool {
        self.value != -1
    }
    pub fn clear_dirty(&mut self) {
        self.is_dirty = false;
    }
}

/// State a command stream depends on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamProperties {
    pub thread_arbitration_policy: StreamProperty,
}

impl StreamProperties {
    pub fn set_thread_arbitration_policy(&mut self, policy: ThreadArbitrationPolicy) {
        if policy != ThreadArbitrationPolicy::NotPresent {
            self.thread_arbitration_policy.set(policy.as_i32());
        }
    }
    pub fn thread_arbitration_policy(&self) -> ThreadArbitrationPolicy {
        ThreadArbitrationPolicy::from_i32(self.thread_arbitration_policy.value)
    }
    pub fn clear_dirty(&mut self) {
        self.thread_arbitration_policy.clear_dirty();
    }
}
