//! Sweep pipeline: per-item swaps, commission settlement and progress.

pub mod commission;
pub mod forward;
pub mod orchestrator;
pub mod progress;

pub use commission::{commission_for, CommissionSettlement};
pub use orchestrator::SweepOrchestrator;
pub use progress::{ProgressEvent, ProgressReporter, ProgressSender};

use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;

/// Unsigned legacy transaction paid for by `payer`, ready for the wallet.
pub(crate) fn unsigned_transaction(instructions: &[Instruction], payer: &Pubkey, blockhash: Hash) -> VersionedTransaction {
    let message = Message::new_with_blockhash(instructions, Some(payer), &blockhash);
    let required = message.header.num_required_signatures as usize;
    VersionedTransaction {
        signatures: vec![Signature::default(); required],
        message: VersionedMessage::Legacy(message),
    }
}
