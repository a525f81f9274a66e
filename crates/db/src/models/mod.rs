pub mod ad_spy_run;
pub mod ad_spy_schedule;
pub mod connected_account;
pub mod script_iteration;
pub mod top_performer;
