use thiserror::Error;

/// Every way script verification can reject a spend.
///
/// The variants mirror the interpreter's failure points one-to-one so a
/// rejection can always be traced to the rule that produced it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptError {
    #[error("script evaluated without error but finished with a false top element")]
    EvalFalse,
    #[error("OP_RETURN was executed")]
    OpReturn,
    #[error("script exceeds the maximum script size")]
    ScriptSize,
    #[error("push exceeds the maximum element size")]
    PushSize,
    #[error("script exceeds the operation count limit")]
    OpCount,
    #[error("stack exceeds the maximum combined depth")]
    StackSize,
    #[error("operation requires more stack elements than are present")]
    InvalidStackOperation,
    #[error("operation requires more altstack elements than are present")]
    InvalidAltstackOperation,
    #[error("OP_ELSE or OP_ENDIF without a matching OP_IF, or an unterminated OP_IF")]
    UnbalancedConditional,
    #[error("a disabled opcode was encountered")]
    DisabledOpcode,
    #[error("a reserved opcode was executed")]
    ReservedOpcode,
    #[error("an undefined opcode was encountered")]
    BadOpcode,
    #[error("OP_VERIFY failed")]
    Verify,
    #[error("OP_EQUALVERIFY failed")]
    EqualVerify,
    #[error("OP_CHECKMULTISIGVERIFY failed")]
    CheckMultisigVerify,
    #[error("OP_CHECKSIGVERIFY failed")]
    CheckSigVerify,
    #[error("OP_NUMEQUALVERIFY failed")]
    NumEqualVerify,
    #[error("script number exceeds the permitted range")]
    InvalidNumberRange,
    #[error("script number is not minimally encoded")]
    ImpossibleEncoding,
    #[error("negative lock time")]
    NegativeLocktime,
    #[error("lock time requirement not satisfied")]
    UnsatisfiedLocktime,
    #[error("signature hash type is invalid")]
    SigHashType,
    #[error("signature is not strict DER")]
    SigDer,
    #[error("signature S value is too high")]
    SigHighS,
    #[error("CHECKMULTISIG dummy element is not null")]
    SigNullDummy,
    #[error("failed signature is not an empty byte string")]
    SigNullFail,
    #[error("public key is not validly encoded")]
    PubkeyType,
    #[error("signature has an invalid length")]
    SigBadLength,
    #[error("Schnorr signature verification failed")]
    SchnorrSig,
    #[error("data push is not minimally encoded")]
    MinimalData,
    #[error("scriptSig is not push-only")]
    SigPushOnly,
    #[error("stack not clean after evaluation")]
    CleanStack,
    #[error("witness program has the wrong length")]
    WitnessProgramWrongLength,
    #[error("witness program witness is empty")]
    WitnessProgramEmpty,
    #[error("witness program hash mismatch")]
    WitnessProgramMismatch,
    #[error("witness provided where none was expected, or scriptSig not empty")]
    WitnessMalleated,
    #[error("witness provided for a non-witness script")]
    WitnessUnexpected,
    #[error("witness public key is not compressed")]
    WitnessPubkeyType,
    #[error("taproot control block has the wrong size")]
    TaprootWrongControlSize,
    #[error("tapscript validation weight exceeded")]
    TaprootValidationWeight,
    #[error("OP_CHECKMULTISIG is not valid in tapscript")]
    TaprootCheckMultisig,
    #[error("OP_IF argument is not minimal in tapscript")]
    TaprootMinimalIf,
    #[error("discouraged upgradable NOP")]
    DiscourageUpgradableNops,
    #[error("discouraged upgradable witness program")]
    DiscourageUpgradableWitnessProgram,
    #[error("interpreter memory limit exceeded")]
    OutOfMemory,
}
