use bitflags::bitflags;

bitflags! {
    /// Script verification flags.
    ///
    /// Each flag turns on a rule that activated at some height; consensus
    /// code derives the active set for a block from the network's
    /// activation schedule. Executing with no flags reproduces the
    /// original 2009 semantics.
    pub struct VerifyFlags: u32 {
        /// BIP-16: evaluate pay-to-script-hash.
        const P2SH = 1 << 0;
        /// BIP-66: signatures must be strict DER.
        const DERSIG = 1 << 1;
        /// Reject high-S signatures (low-S malleability rule).
        const LOW_S = 1 << 2;
        /// The CHECKMULTISIG dummy must be the empty byte string.
        const NULLDUMMY = 1 << 3;
        /// scriptSig must be push-only.
        const SIGPUSHONLY = 1 << 4;
        /// Pushes and numbers must use their shortest encoding.
        const MINIMALDATA = 1 << 5;
        /// Exactly one element may remain after evaluation.
        const CLEANSTACK = 1 << 6;
        /// BIP-65: OP_CHECKLOCKTIMEVERIFY.
        const CHECKLOCKTIMEVERIFY = 1 << 7;
        /// BIP-112: OP_CHECKSEQUENCEVERIFY.
        const CHECKSEQUENCEVERIFY = 1 << 8;
        /// BIP-141: witness program evaluation.
        const WITNESS = 1 << 9;
        /// A failed signature check must consume an empty signature.
        const NULLFAIL = 1 << 10;
        /// OP_IF in witness v0 scripts must consume exactly 0x01 or empty.
        const MINIMALIF = 1 << 11;
        /// Witness v0 public keys must be compressed.
        const WITNESS_PUBKEYTYPE = 1 << 12;
        /// BIP-341/342: taproot and tapscript evaluation.
        const TAPROOT = 1 << 13;
        /// Reject use of upgradable NOPs (relay policy, not consensus).
        const DISCOURAGE_UPGRADABLE_NOPS = 1 << 14;
        /// Reject unknown witness versions (relay policy, not consensus).
        const DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM = 1 << 15;
    }
}

impl VerifyFlags {
    /// Everything consensus enforces at the current tip.
    pub fn all_consensus() -> VerifyFlags {
        VerifyFlags::P2SH
            | VerifyFlags::DERSIG
            | VerifyFlags::LOW_S
            | VerifyFlags::NULLDUMMY
            | VerifyFlags::MINIMALDATA
            | VerifyFlags::CHECKLOCKTIMEVERIFY
            | VerifyFlags::CHECKSEQUENCEVERIFY
            | VerifyFlags::WITNESS
            | VerifyFlags::NULLFAIL
            | VerifyFlags::TAPROOT
    }
}
