//! Direct token transfer to the commission recipient for items the
//! aggregator could not route.

use super::unsigned_transaction;
use crate::error::SweepError;
use crate::ledger::LedgerClient;
use crate::types::Holding;
use crate::wallet::WalletCapability;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use tracing::{info, instrument};

/// Create-idempotent on the recipient's associated account, then
/// `TransferChecked` of the full raw balance. Works for both token programs.
pub fn forward_instructions(
    holding: &Holding,
    mint: &Pubkey,
    owner: &Pubkey,
    recipient: &Pubkey,
) -> Result<Vec<Instruction>, SweepError> {
    let destination = get_associated_token_address_with_program_id(recipient, mint, &holding.token_program);
    let transfer = spl_token_2022::instruction::transfer_checked(
        &holding.token_program,
        &holding.token_account,
        mint,
        &destination,
        owner,
        &[],
        holding.raw_amount,
        holding.decimals,
    )
    .map_err(|e| SweepError::BuildFailure(format!("transfer of {}: {}", holding.mint, e)))?;

    Ok(vec![
        create_associated_token_account_idempotent(owner, recipient, mint, &holding.token_program),
        transfer,
    ])
}

/// Move the full raw balance of `holding` to `recipient`'s token account.
#[instrument(skip(ledger, wallet, holding), fields(mint = %holding.mint))]
pub async fn forward_holding(
    ledger: &dyn LedgerClient,
    wallet: &dyn WalletCapability,
    holding: &Holding,
    owner: &Pubkey,
    recipient: &Pubkey,
) -> Result<Signature, SweepError> {
    let mint = holding
        .mint_pubkey()
        .ok_or_else(|| SweepError::InvalidAddress(holding.mint.clone()))?;
    if holding.raw_amount == 0 {
        return Err(SweepError::DustTooSmall);
    }

    let instructions = forward_instructions(holding, &mint, owner, recipient)?;

    let blockhash = ledger
        .latest_blockhash()
        .await
        .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;
    let signed = wallet
        .sign_transaction(unsigned_transaction(&instructions, owner, blockhash))
        .await?;
    let signature = ledger
        .send_transaction(&signed)
        .await
        .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;
    ledger
        .confirm_transaction(&signature)
        .await
        .map_err(|e| SweepError::Submission(format!("{:#}", e)))?;

    info!("Forwarded {} {} to {}: {}", holding.raw_amount, holding.symbol, recipient, signature);
    Ok(signature)
}
