// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use cairn_kernel::types::{Hash, ValidatorSet};

use super::{AbciResponses, AppError, AppInfo, AppResult, Application, TxResult};

/// Stands in for an application that already committed a block whose state
/// update was lost. Hands back the saved DeliverTx results and the app hash
/// the real application reported, without executing anything.
#[derive(Debug, Clone)]
pub struct ReplayedResponsesApp {
    responses: AbciResponses,
    next: usize,
    info: AppInfo,
}

impl ReplayedResponsesApp {
    pub fn new(responses: AbciResponses, info: AppInfo) -> Self {
        Self {
            responses,
            next: 0,
            info,
        }
    }
}

impl Application for ReplayedResponsesApp {
    fn info(&self) -> AppResult<AppInfo> {
        Ok(self.info)
    }

    fn init_chain(&mut self, _validators: &ValidatorSet) -> AppResult<Option<ValidatorSet>> {
        Ok(None)
    }

    fn deliver_tx(&mut self, _tx: &[u8]) -> AppResult<TxResult> {
        let res = self
            .responses
            .deliver_txs
            .get(self.next)
            .cloned()
            .ok_or_else(|| AppError::Exhausted(format!("no saved result for tx #{}", self.next)))?;
        self.next += 1;
        Ok(res)
    }

    fn commit(&mut self) -> AppResult<Hash> {
        Ok(self.info.last_block_app_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_saved_results_in_order() {
        let responses = AbciResponses {
            deliver_txs: vec![
                TxResult { code: 0, data: b"a".to_vec(), log: String::new() },
                TxResult { code: 1, data: Vec::new(), log: "bad".into() },
            ],
        };
        let info = AppInfo { last_block_height: 4, last_block_app_hash: Hash([9; 32]) };
        let mut app = ReplayedResponsesApp::new(responses.clone(), info);

        assert_eq!(app.deliver_tx(b"ignored").unwrap(), responses.deliver_txs[0]);
        assert_eq!(app.deliver_tx(b"ignored").unwrap(), responses.deliver_txs[1]);
        assert!(matches!(app.deliver_tx(b"x"), Err(AppError::Exhausted(_))));
        assert_eq!(app.commit().unwrap(), Hash([9; 32]));
    }
}
