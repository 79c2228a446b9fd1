use crate::{
    Command,
    terminal::{
        TerminalNotifier,
        confirm,
        format_numbers,
        print_json,
    },
};
use alloy::primitives::{
    Address,
    B256,
    TxHash,
};
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    eyre,
};
use futures::future::try_join_all;
use serde::Serialize;
use lottery_client::{
    DrawStage,
    DrawWorkflow,
    EvmChain,
    LotteryChain,
    Notifier,
    SaleAmount,
    SaleQuote,
    SaleStatus,
    Session,
    model::DrawExtended,
    numeric::{
        format_amount,
        format_amount_truncated,
        parse_amount,
        round2,
    },
    odds::OddsTable,
    workflow::{
        RoundPhase,
        TriggerOptions,
    },
};
use std::{
    future::Future,
    sync::Arc,
};
use tokio::sync::watch;

type LiveSession = Arc<Session<EvmChain>>;

pub fn odds(numbers: usize, json: bool) -> Result<()> {
    let table = OddsTable::for_ticket(numbers)?;
    if json {
        return print_json(&table);
    }
    println!(
        "{} numbers play {} combinations",
        table.numbers, table.combinations
    );
    for row in &table.rows {
        println!(
            "  {} matches: 1 in {}  ({} x {} / {})",
            row.matches,
            round2(row.inverse_odds),
            row.drawn_ways,
            row.other_ways,
            row.total_ways
        );
    }
    println!("  any prize: 1 in {}", round2(table.any_prize));
    Ok(())
}

pub async fn run(session: LiveSession, command: Command, json: bool, yes: bool) -> Result<()> {
    match command {
        Command::Jackpot { watch } => jackpot(&session, watch).await,
        Command::Odds { numbers } => odds(numbers, json),
        Command::Price { numbers } => {
            let price = session.ticket_price(&numbers).await?;
            println!("{} for {}", format_amount(&price), format_numbers(&numbers));
            Ok(())
        }
        Command::Buy { numbers, referral } => {
            let referral = referral.as_deref().map(parse_referral).transpose()?;
            let price = session.ticket_price(&numbers).await?;
            confirm(
                format!(
                    "Buy {} for {}?",
                    format_numbers(&numbers),
                    format_amount(&price)
                ),
                yes,
            )
            .await?;
            let hash = session.purchase_ticket(&numbers, referral).await?;
            print_transaction(&session, "ticket purchased", hash);
            Ok(())
        }
        Command::Tickets { account } => {
            tickets(&session, account_or_signer(&session, account)?, json).await
        }
        Command::WithdrawPrize { id } => {
            confirm(format!("Withdraw the prize of ticket {id}?"), yes).await?;
            let hash = session.withdraw_prize(id).await?;
            print_transaction(&session, "prize withdrawn", hash);
            Ok(())
        }
        Command::Draws { count } => draws(&session, count, json).await,
        Command::Stage { watch } => stage(session, watch).await,
        Command::Draw {
            subscription_id,
            key_hash,
            native_payment,
        } => {
            let workflow = DrawWorkflow::new(session.clone(), TerminalNotifier);
            let options = TriggerOptions {
                vrf_subscription_id: subscription_id,
                vrf_key_hash: key_hash,
                native_payment,
            };
            let request = workflow.draw_request(options)?;
            let hash = workflow
                .confirmed(
                    "draw",
                    confirm(
                        format!(
                            "Request randomness with subscription {}?",
                            request.vrf_subscription_id
                        ),
                        yes,
                    ),
                    || workflow.trigger(options),
                )
                .await?;
            print_transaction(&session, "draw requested", hash);
            Ok(())
        }
        Command::CloseRound => {
            let workflow = DrawWorkflow::new(session.clone(), TerminalNotifier);
            let hash = workflow
                .confirmed(
                    "close round",
                    confirm("Close the round?".to_string(), yes),
                    || workflow.close_round(),
                )
                .await?;
            print_transaction(&session, "round closed", hash);
            Ok(())
        }
        Command::Partner { account } => {
            let status = session
                .partner_status(account_or_signer(&session, account)?)
                .await?;
            if json {
                return print_json(&status);
            }
            if !status.is_partner() {
                println!("{} holds no governance tokens", status.account);
                return Ok(());
            }
            println!("balance:           {}", format_amount(&status.balance));
            println!(
                "unclaimed revenue: {}",
                format_amount(&status.unclaimed_revenue)
            );
            Ok(())
        }
        Command::WithdrawRevenue => {
            confirm("Withdraw unclaimed revenue?".to_string(), yes).await?;
            let hash = session.withdraw_revenue().await?;
            print_transaction(&session, "revenue withdrawn", hash);
            Ok(())
        }
        Command::Ico {
            dai,
            exl,
            share,
            buy,
            account,
        } => {
            let amount = sale_amount(dai.as_deref(), exl.as_deref(), share)?;
            let account = account.or(session.account());
            ico(&session, amount, buy, account, json, yes).await
        }
        Command::IcoRedeem => {
            confirm("Redeem every token bought in the sale?".to_string(), yes).await?;
            let hash = session.redeem_sale_tokens().await?;
            print_transaction(&session, "tokens redeemed", hash);
            Ok(())
        }
    }
}

fn account_or_signer(session: &LiveSession, account: Option<Address>) -> Result<Address> {
    account
        .or(session.account())
        .ok_or_else(|| eyre!("pass --account or unlock a --wallet"))
}

/// Referral codes shorter than 32 bytes are left-aligned, like a
/// `bytes32` string literal.
fn parse_referral(raw: &str) -> Result<B256> {
    let bytes = hex::decode(raw.trim_start_matches("0x"))?;
    if bytes.len() > 32 {
        return Err(eyre!("referral code is {} bytes, at most 32 allowed", bytes.len()));
    }
    let mut code = B256::ZERO;
    code[..bytes.len()].copy_from_slice(&bytes);
    Ok(code)
}

/// `--share` is a percentage of the supply.
fn sale_amount(
    dai: Option<&str>,
    exl: Option<&str>,
    share: Option<f64>,
) -> Result<Option<SaleAmount>> {
    let parse = |raw: &str| parse_amount(raw).ok_or_else(|| eyre!("invalid amount `{raw}`"));
    Ok(match (dai, exl, share) {
        (Some(dai), _, _) => Some(SaleAmount::Currency(parse(dai)?)),
        (_, Some(exl), _) => Some(SaleAmount::Tokens(parse(exl)?)),
        (_, _, Some(percent)) => Some(SaleAmount::Share(percent / 100.0)),
        _ => None,
    })
}

#[derive(Serialize)]
struct IcoReport {
    status: SaleStatus,
    quote: Option<SaleQuote>,
}

async fn ico(
    session: &LiveSession,
    amount: Option<SaleAmount>,
    buy: bool,
    account: Option<Address>,
    json: bool,
    yes: bool,
) -> Result<()> {
    let status = session.sale_status(account).await?;
    let quote = amount
        .map(|amount| SaleQuote::at_price(amount, &status.price))
        .transpose()?;
    if json {
        print_json(&IcoReport {
            status: status.clone(),
            quote: quote.clone(),
        })?;
    } else {
        println!(
            "sale {}: {}, {} per token",
            status.sale,
            if status.is_open { "open" } else { "closed" },
            format_amount(&status.price)
        );
        if let Some(balance) = &status.balance {
            let redeemable = if status.can_redeem() { ", redeemable" } else { "" };
            println!("bought: {}{redeemable}", format_amount(balance));
        }
        if let Some(quote) = &quote {
            print_quote(quote);
        }
    }
    let Some(quote) = quote.filter(|_| buy) else {
        return Ok(());
    };
    confirm(
        format!(
            "Buy {} tokens for {}?",
            format_amount_truncated(&quote.tokens, 2),
            format_amount(&quote.currency)
        ),
        yes,
    )
    .await?;
    let hash = session.buy_sale_tokens(quote.tokens).await?;
    print_transaction(session, "tokens bought", hash);
    Ok(())
}

fn print_quote(quote: &SaleQuote) {
    println!(
        "{} buys {} tokens, {:.6}% of the supply",
        format_amount(&quote.currency),
        format_amount(&quote.tokens),
        quote.share * 100.0
    );
}

fn print_transaction(session: &LiveSession, what: &str, hash: TxHash) {
    match session.config().transaction_url(hash) {
        Some(url) => println!("{what}: {url}"),
        None => println!("{what}: {hash}"),
    }
}

async fn jackpot(session: &LiveSession, watch: bool) -> Result<()> {
    if !watch {
        println!("{}", format_amount(&session.jackpot().await?));
        return Ok(());
    }
    let subscription =
        session.subscribe_to_jackpot(|jackpot| println!("{}", format_amount(&jackpot)))
            .await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received interrupt, exiting");
    subscription.cancel();
    Ok(())
}

async fn tickets(session: &LiveSession, account: Address, json: bool) -> Result<()> {
    let tickets = session.tickets(account).await?;
    let tickets =
        try_join_all(tickets.into_iter().map(|ticket| session.extended_ticket(ticket)))
            .await?;
    if json {
        return print_json(&tickets);
    }
    if tickets.is_empty() {
        println!("{account} has no tickets");
    }
    for ticket in &tickets {
        let status = match ticket.ticket.matches() {
            None => "round open".to_string(),
            Some(_) if ticket.is_withdrawn() => {
                format!("won {}, withdrawn", format_amount(&ticket.prize))
            }
            Some(_) if ticket.can_withdraw() => {
                format!("won {}", format_amount(&ticket.prize))
            }
            Some(matches) => format!("{matches} matches"),
        };
        println!(
            "#{} round {}: {}  [{}]",
            ticket.ticket.id,
            ticket.ticket.round,
            format_numbers(&ticket.ticket.numbers),
            status
        );
    }
    Ok(())
}

async fn draws(session: &LiveSession, count: u64, json: bool) -> Result<()> {
    let mut rounds = vec![session.current_draw().await?];
    rounds.extend(session.past_draws(count).await?);
    let draws = try_join_all(rounds.into_iter().map(|draw| session.extended_draw(draw)))
        .await?;
    if json {
        return print_json(&draws);
    }
    for draw in &draws {
        print_draw(session, draw);
    }
    Ok(())
}

fn print_draw(session: &LiveSession, extended: &DrawExtended) {
    let draw = &extended.draw;
    if !draw.is_closed() {
        println!("round {}: open", draw.round);
        return;
    }
    println!("round {}: {}", draw.round, format_numbers(&draw.numbers));
    for matches in (2..=6).rev() {
        if let (Some(prize), Some(winners)) = (draw.prize_for(matches), draw.winners_for(matches))
        {
            println!(
                "  {matches} matches: {winners} winners, {} each",
                format_amount_truncated(prize, 2)
            );
        }
    }
    let links = [
        ("randomness requested", extended.draw_transaction),
        ("closed", extended.closure_transaction),
    ];
    for (what, hash) in links {
        if let Some(hash) = hash {
            let link = session
                .config()
                .transaction_url(hash)
                .unwrap_or_else(|| hash.to_string());
            println!("  {what}: {link}");
        }
    }
}

async fn stage(session: LiveSession, watch: bool) -> Result<()> {
    let workflow = Arc::new(DrawWorkflow::new(session, TerminalNotifier));
    if !watch {
        let stage = workflow.evaluate().await?;
        println!("{}", describe_stage(&workflow, stage).await?);
        return Ok(());
    }
    let (stages, subscription) = workflow.watch().await?;
    let interrupted = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received interrupt, exiting");
    };
    follow_stages(&workflow, stages, interrupted, |line| println!("{line}")).await;
    workflow.cancel_pending_checks();
    subscription.cancel();
    Ok(())
}

/// Reports every stage until `shutdown` resolves or the stage feed closes.
/// A report whose details cannot be read is skipped; the next stage change
/// is still reported.
async fn follow_stages<C, N>(
    workflow: &DrawWorkflow<C, N>,
    mut stages: watch::Receiver<Option<DrawStage>>,
    shutdown: impl Future<Output = ()>,
    mut report: impl FnMut(String),
) where
    C: LotteryChain,
    N: Notifier,
{
    tokio::pin!(shutdown);
    loop {
        let stage = *stages.borrow_and_update();
        if let Some(stage) = stage {
            match describe_stage(workflow, stage).await {
                Ok(line) => report(line),
                Err(e) => tracing::warn!("could not describe stage `{stage}`: {e}"),
            }
        }
        tokio::select! {
            changed = stages.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }
}

async fn describe_stage<C, N>(
    workflow: &DrawWorkflow<C, N>,
    stage: DrawStage,
) -> lottery_client::Result<String>
where
    C: LotteryChain,
    N: Notifier,
{
    let line = match stage {
        DrawStage::Round => match workflow.round_phase(Utc::now()).await? {
            RoundPhase::Countdown(countdown) => format!("{stage}: next draw in {countdown}"),
            RoundPhase::AwaitingContract => format!("{stage}: Waiting for smartcontract"),
        },
        DrawStage::WaitForVrf => match workflow.pending_request().await? {
            Some(hash) => {
                let link = workflow
                    .session()
                    .config()
                    .transaction_url(hash)
                    .unwrap_or_else(|| hash.to_string());
                format!("{stage}: requested in {link}")
            }
            None => stage.to_string(),
        },
        DrawStage::Trigger | DrawStage::CloseRound => stage.to_string(),
    };
    Ok(line)
}
