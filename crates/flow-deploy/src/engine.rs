//! ローリングデプロイエンジン
//!
//! サービスごとに pull → スケールアップ → ヘルス待ち → ドレイン →
//! スケールダウンを実行する状態機械。守るべき不変条件はひとつ:
//! 新コンテナがhealthyを報告するまで、既存の配信中コンテナには
//! 一切触れない。失敗時は新コンテナだけを取り除いて旧状態へ戻す。
//!
//! サービス間は計画順に直列で、最初の失敗で残りはSkippedになる。
//! 成功済みサービスは巻き戻さない（各サービスは独立してデプロイ
//! 可能であることが前提）。

use crate::compose::ComposeInvoker;
use crate::log::{Logger, SummaryRow};
use flow_deploy_container::{ContainerProbe, ContainerStatus, Health};
use flow_deploy_manifest::{DeployPlan, ServiceConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 単調時計。ヘルス待ちのタイムアウトをテストから決定的に
/// 駆動するための抽象
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// このrunで使うタグ
///
/// `--tag` 指定時だけ `DEPLOY_TAG` を子プロセスへ渡す。未指定なら
/// マニフェストの `${DEPLOY_TAG:-…}` 既定値に任せ、履歴と表示には
/// 現在のタグ（無ければ `latest`）を使う。
pub struct DeployTag {
    pub value: String,
    pub exported: bool,
}

impl DeployTag {
    pub fn requested(tag: &str) -> DeployTag {
        DeployTag {
            value: tag.to_string(),
            exported: true,
        }
    }

    pub fn manifest_default(history_head: Option<String>) -> DeployTag {
        DeployTag {
            value: history_head.unwrap_or_else(|| "latest".to_string()),
            exported: false,
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        if self.exported {
            vec![("DEPLOY_TAG".to_string(), self.value.clone())]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub name: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct DeployReport {
    pub services: Vec<ServiceReport>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl DeployReport {
    pub fn success(&self) -> bool {
        !self.cancelled
            && self
                .services
                .iter()
                .all(|s| s.outcome == Outcome::Succeeded)
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else if self.cancelled {
            130
        } else {
            1
        }
    }

    pub fn summary_rows(&self) -> Vec<SummaryRow> {
        self.services
            .iter()
            .map(|s| SummaryRow {
                service: s.name.clone(),
                outcome: match s.outcome {
                    Outcome::Succeeded => format!("✓ {}", s.outcome),
                    Outcome::Failed => format!("✗ {}", s.outcome),
                    Outcome::Skipped => s.outcome.to_string(),
                },
                elapsed: match s.outcome {
                    Outcome::Skipped => "-".to_string(),
                    _ => format!("{}s", fmt_secs(s.elapsed)),
                },
            })
            .collect()
    }
}

/// ヘルス待ちの結果
enum HealthVerdict {
    Healthy,
    Unhealthy,
    TimedOut,
    /// コンテナがrunningでなくなった
    Exited,
    /// healthcheckが定義されていない（設定が実行中に変わった場合のみ）
    NoHealthcheck,
    ProbeFailed(String),
    Cancelled,
}

enum ServiceResult {
    Done,
    Failed,
    Cancelled,
}

pub struct Engine<'a, C, P, K> {
    compose: &'a C,
    probe: &'a P,
    clock: &'a K,
    log: &'a Logger,
    cancel: Arc<AtomicBool>,
}

impl<'a, C: ComposeInvoker, P: ContainerProbe, K: Clock> Engine<'a, C, P, K> {
    pub fn new(
        compose: &'a C,
        probe: &'a P,
        clock: &'a K,
        log: &'a Logger,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Engine {
            compose,
            probe,
            clock,
            log,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// 計画順にサービスを処理する
    pub async fn deploy(&self, plan: &DeployPlan, tag: &DeployTag) -> DeployReport {
        let run_start = self.clock.now();

        self.log.header("deploy");
        self.log.info(&format!("tag: {}", tag.value));
        self.log
            .info(&format!("services: {}", plan.service_names().join(", ")));
        for warning in &plan.warnings {
            self.log.info(&format!("⚠ {warning}"));
        }
        self.log.info("");

        let mut services = Vec::new();
        let mut aborted = false;
        let mut cancelled = false;

        for svc in &plan.services {
            if aborted || cancelled {
                services.push(ServiceReport {
                    name: svc.name.clone(),
                    outcome: Outcome::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }
            if self.cancelled() {
                cancelled = true;
                services.push(ServiceReport {
                    name: svc.name.clone(),
                    outcome: Outcome::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            let svc_start = self.clock.now();
            let result = self.deploy_service(svc, tag).await;
            let elapsed = self.clock.now().duration_since(svc_start);

            let outcome = match result {
                ServiceResult::Done => Outcome::Succeeded,
                ServiceResult::Failed => {
                    aborted = true;
                    Outcome::Failed
                }
                ServiceResult::Cancelled => {
                    cancelled = true;
                    Outcome::Failed
                }
            };
            services.push(ServiceReport {
                name: svc.name.clone(),
                outcome,
                elapsed,
            });
        }

        let elapsed = self.clock.now().duration_since(run_start);
        let report = DeployReport {
            services,
            cancelled,
            elapsed,
        };

        self.log.info("");
        if report.success() {
            self.log
                .footer(&format!("complete ({}s)", fmt_secs(report.elapsed)));
        } else {
            self.log.footer("FAILED (deploy aborted)");
        }
        report
    }

    /// 1サービス分の状態機械:
    /// Pulling → Starting → Waiting → Draining → Scaling-Down
    /// 失敗枝は新コンテナの除去とスケール正常化だけを行う
    async fn deploy_service(&self, svc: &ServiceConfig, tag: &DeployTag) -> ServiceResult {
        self.log.service_start(&svc.name);
        let start = self.clock.now();
        let env = tag.env();

        // Pulling。ここで失敗してもコンテナには何も起きていない
        let image = svc.image.as_deref().unwrap_or(&svc.name);
        self.log.step(&format!("pulling {image}..."));
        let pull_start = self.clock.now();
        match self.compose.pull(&svc.name, &env).await {
            Ok(out) if out.success() => {
                let pulled = self.clock.now().duration_since(pull_start);
                self.log.step(&format!("pulled ({}s)", fmt_secs(pulled)));
            }
            Ok(out) => {
                self.log
                    .failure(&format!("pull failed: {}", out.stderr_tail()));
                self.log.service_end();
                return ServiceResult::Failed;
            }
            Err(e) => {
                self.log.failure(&format!("pull failed: {e:#}"));
                self.log.service_end();
                return ServiceResult::Failed;
            }
        }

        // デプロイ前のコンテナ集合O。候補の特定と、ヘルス確認後の
        // ドレイン対象の両方に使う
        let old = match self.probe.list(&svc.name).await {
            Ok(containers) => containers,
            Err(e) => {
                self.log.failure(&format!("container listing failed: {e}"));
                self.log.service_end();
                return ServiceResult::Failed;
            }
        };
        let old_ids: HashSet<&str> = old.iter().map(|c| c.id.as_str()).collect();

        // Starting: スケール2で新コンテナを並走させる
        self.log.step("starting new container...");
        match self.compose.up_scale(&svc.name, 2, true, &env).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                self.log
                    .failure(&format!("scale up failed: {}", out.stderr_tail()));
                self.log.service_end();
                return ServiceResult::Failed;
            }
            Err(e) => {
                self.log.failure(&format!("scale up failed: {e:#}"));
                self.log.service_end();
                return ServiceResult::Failed;
            }
        }

        // 候補 = スケールアップ後の集合とOの差分。ちょうど1つでなければ
        // 何かがおかしいので正常化して中断する
        let candidate = match self.probe.list(&svc.name).await {
            Ok(after) => {
                let fresh: Vec<ContainerStatus> = after
                    .into_iter()
                    .filter(|c| !old_ids.contains(c.id.as_str()))
                    .collect();
                if fresh.len() != 1 {
                    self.log.failure(&format!(
                        "expected exactly one new container, found {}",
                        fresh.len()
                    ));
                    self.scale_back(&svc.name, &env).await;
                    self.log.service_end();
                    return ServiceResult::Failed;
                }
                fresh.into_iter().next().unwrap()
            }
            Err(e) => {
                self.log.failure(&format!("container listing failed: {e}"));
                self.scale_back(&svc.name, &env).await;
                self.log.service_end();
                return ServiceResult::Failed;
            }
        };

        // Waiting: 新コンテナのhealthcheckを固定間隔でポーリング
        self.log.step(&format!(
            "waiting for health check (timeout: {}s)...",
            svc.healthcheck_timeout_seconds
        ));
        let verdict = self.wait_for_healthy(&candidate.id, svc).await;

        match verdict {
            HealthVerdict::Healthy => {
                let healthy_at = self.clock.now().duration_since(start);
                self.log.step(&format!("healthy ({}s)", fmt_secs(healthy_at)));

                // Draining: 旧コンテナを順にSIGTERM→SIGKILLで引き抜く。
                // リバースプロキシはコンテナの停止を観測して経路から外す
                let mut drain_failed = false;
                for container in &old {
                    self.log.step(&format!(
                        "draining old container ({}, {}s timeout)...",
                        short_id(&container.id),
                        svc.drain_seconds
                    ));
                    if let Err(e) = self.probe.stop(&container.id, svc.drain_seconds).await {
                        self.log.failure(&format!("drain failed: {e}"));
                        drain_failed = true;
                        continue;
                    }
                    if let Err(e) = self.probe.remove(&container.id).await {
                        self.log.failure(&format!("remove failed: {e}"));
                        drain_failed = true;
                    }
                }

                // Scaling-Down: composeの認識をスケール1へ戻す
                self.scale_back(&svc.name, &env).await;

                if drain_failed {
                    self.log.failure(&format!("{} FAILED", svc.name));
                    self.log.service_end();
                    return ServiceResult::Failed;
                }

                let elapsed = self.clock.now().duration_since(start);
                self.log
                    .success(&format!("{} deployed ({}s)", svc.name, fmt_secs(elapsed)));
                self.log.service_end();
                ServiceResult::Done
            }
            HealthVerdict::Cancelled => {
                self.log.step("interrupted, rolling back...");
                self.roll_back(svc, &candidate.id, &env).await;
                self.log.failure(&format!("{} FAILED", svc.name));
                self.log.service_end();
                ServiceResult::Cancelled
            }
            other => {
                let reason = match other {
                    HealthVerdict::Unhealthy => "unhealthy".to_string(),
                    HealthVerdict::TimedOut => {
                        format!("timed out after {}s", svc.healthcheck_timeout_seconds)
                    }
                    HealthVerdict::Exited => "container exited".to_string(),
                    HealthVerdict::NoHealthcheck => {
                        "container has no healthcheck".to_string()
                    }
                    HealthVerdict::ProbeFailed(e) => e,
                    _ => unreachable!(),
                };
                self.log.step(&format!("health check failed: {reason}"));
                self.roll_back(svc, &candidate.id, &env).await;
                self.log.failure(&format!("{} FAILED", svc.name));
                self.log.service_end();
                ServiceResult::Failed
            }
        }
    }

    /// ポーリングはhealthy判定を先に見るので、ちょうどタイムアウト時刻に
    /// healthyへ遷移したコンテナは成功として扱われる
    async fn wait_for_healthy(&self, container_id: &str, svc: &ServiceConfig) -> HealthVerdict {
        let start = self.clock.now();
        let timeout = Duration::from_secs(svc.healthcheck_timeout_seconds);
        let poll = Duration::from_secs(svc.healthcheck_poll_seconds);

        loop {
            if self.cancelled() {
                return HealthVerdict::Cancelled;
            }

            match self.probe.inspect(container_id).await {
                Err(e) => return HealthVerdict::ProbeFailed(e.to_string()),
                Ok(status) => {
                    if status.running && status.health == Health::Healthy {
                        return HealthVerdict::Healthy;
                    }
                    if status.health == Health::Unhealthy {
                        return HealthVerdict::Unhealthy;
                    }
                    if !status.running {
                        return HealthVerdict::Exited;
                    }
                    if status.health == Health::None {
                        return HealthVerdict::NoHealthcheck;
                    }
                }
            }

            if self.clock.now().duration_since(start) >= timeout {
                return HealthVerdict::TimedOut;
            }
            self.clock.sleep(poll).await;
        }
    }

    /// 失敗枝: 新コンテナだけを取り除く。Oのコンテナには触れない。
    /// ここでの失敗はログに残すだけで正常化までは続行する
    async fn roll_back(&self, svc: &ServiceConfig, new_id: &str, env: &[(String, String)]) {
        self.log.step(&format!(
            "rolling back: stopping new container ({})...",
            short_id(new_id)
        ));
        if let Err(e) = self.probe.stop(new_id, svc.drain_seconds).await {
            self.log.failure(&format!("rollback stop failed: {e}"));
        }
        if let Err(e) = self.probe.remove(new_id).await {
            self.log.failure(&format!("rollback remove failed: {e}"));
        }
        self.scale_back(&svc.name, env).await;
        self.log.step("rollback complete, old container still serving");
    }

    /// composeの認識をスケール1へ戻す。結果の成否はrunの成否に影響させない
    async fn scale_back(&self, service: &str, env: &[(String, String)]) {
        match self.compose.up_scale(service, 1, false, env).await {
            Ok(out) if out.success() => {}
            Ok(out) => self
                .log
                .step(&format!("warning: scale down failed: {}", out.stderr_tail())),
            Err(e) => self.log.step(&format!("warning: scale down failed: {e:#}")),
        }
    }
}

/// 実行せずに手順だけを流す
pub fn dry_run(log: &Logger, plan: &DeployPlan, tag: &DeployTag) {
    log.header("deploy (dry-run)");
    log.info(&format!("tag: {}", tag.value));
    log.info(&format!("services: {}", plan.service_names().join(", ")));
    for warning in &plan.warnings {
        log.info(&format!("⚠ {warning}"));
    }
    log.info("");

    for svc in &plan.services {
        log.service_start(&svc.name);
        log.step(&format!(
            "would pull {}",
            svc.image.as_deref().unwrap_or(&svc.name)
        ));
        log.step(&format!(
            "would scale to 2, health check (timeout: {}s)",
            svc.healthcheck_timeout_seconds
        ));
        log.step(&format!(
            "would drain old container ({}s timeout)",
            svc.drain_seconds
        ));
        log.step("would scale back to 1");
        log.service_end();
    }
    log.footer("dry-run complete");
}

pub(crate) fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}

fn fmt_secs(duration: Duration) -> String {
    format!("{:.1}", duration.as_secs_f64())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use flow_deploy_manifest::Role;

    fn app(name: &str, order: i64) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            role: Role::App,
            image: Some(format!("ghcr.io/myorg/{name}:latest")),
            order,
            drain_seconds: 30,
            healthcheck_timeout_seconds: 5,
            healthcheck_poll_seconds: 2,
            has_healthcheck: true,
            host: None,
            user: None,
            dir: None,
            position: 0,
        }
    }

    fn plan_of(services: Vec<ServiceConfig>) -> DeployPlan {
        DeployPlan {
            services,
            warnings: Vec::new(),
        }
    }

    fn engine<'a>(
        compose: &'a FakeCompose,
        probe: &'a FakeProbe,
        clock: &'a FakeClock,
        log: &'a Logger,
        cancel: Arc<AtomicBool>,
    ) -> Engine<'a, FakeCompose, FakeProbe, FakeClock> {
        Engine::new(compose, probe, clock, log, cancel)
    }

    /// 2サービスの正常系。旧コンテナだけが止められ、順序が守られる
    #[tokio::test]
    async fn test_happy_path_two_services() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        probe.push_list(&["old_wrk"]);
        probe.push_list(&["old_wrk", "new_wrk"]);
        probe.set_health("new_web", &[Health::Healthy]);
        probe.set_health("new_wrk", &[Health::Healthy]);

        let plan = plan_of(vec![app("web", 10), app("worker", 20)]);
        let tag = DeployTag::requested("abc123f");
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &tag)
            .await;

        assert!(report.success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            probe.stopped.lock().unwrap().clone(),
            vec![("old_web".to_string(), 30), ("old_wrk".to_string(), 30)]
        );
        assert_eq!(probe.removed_ids(), vec!["old_web", "old_wrk"]);

        // サービスNの完了がサービスN+1の開始より先
        let args = compose.recorded_args();
        let pull_web = args.iter().position(|a| a == &["pull", "web"]).unwrap();
        let scale_down_web = args
            .iter()
            .position(|a| {
                a == &["up", "-d", "--no-deps", "--scale", "web=1", "web"]
            })
            .unwrap();
        let pull_wrk = args.iter().position(|a| a == &["pull", "worker"]).unwrap();
        assert!(pull_web < scale_down_web);
        assert!(scale_down_web < pull_wrk);

        // スケールアップは--no-recreate付き
        assert!(args.contains(&vec![
            "up".to_string(),
            "-d".to_string(),
            "--no-deps".to_string(),
            "--no-recreate".to_string(),
            "--scale".to_string(),
            "web=2".to_string(),
            "web".to_string(),
        ]));

        // DEPLOY_TAGが全ての変更系呼び出しへ渡る
        for env in compose.recorded_env() {
            assert_eq!(
                env,
                vec![("DEPLOY_TAG".to_string(), "abc123f".to_string())]
            );
        }
    }

    /// ヘルスチェックのタイムアウトで新コンテナだけが巻き戻される
    #[tokio::test]
    async fn test_health_timeout_rolls_back() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        // ずっとstartingのまま → timeout 5s / poll 2s で打ち切り

        let plan = plan_of(vec![app("web", 10)]);
        let tag = DeployTag::requested("v2");
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &tag)
            .await;

        assert!(!report.success());
        assert_eq!(report.exit_code(), 1);
        // 旧コンテナは無傷、新コンテナだけ除去
        assert_eq!(probe.stopped_ids(), vec!["new_web"]);
        assert_eq!(probe.removed_ids(), vec!["new_web"]);
        // 最後にスケール1へ正常化している
        let args = compose.recorded_args();
        assert_eq!(
            args.last().unwrap(),
            &vec![
                "up".to_string(),
                "-d".to_string(),
                "--no-deps".to_string(),
                "--scale".to_string(),
                "web=1".to_string(),
                "web".to_string(),
            ]
        );
    }

    /// unhealthyは即座にロールバック
    #[tokio::test]
    async fn test_unhealthy_rolls_back() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        probe.set_health("new_web", &[Health::Starting, Health::Unhealthy]);

        let plan = plan_of(vec![app("web", 10)]);
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &DeployTag::requested("v2"))
            .await;

        assert!(!report.success());
        assert_eq!(probe.stopped_ids(), vec!["new_web"]);
        assert_eq!(probe.removed_ids(), vec!["new_web"]);
    }

    /// ちょうどタイムアウト時刻のhealthyは成功として扱う
    #[tokio::test]
    async fn test_healthy_at_exact_timeout() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        // poll 2s × 2回の待機後、経過4s（= timeout）の時点でhealthy
        probe.set_health(
            "new_web",
            &[Health::Starting, Health::Starting, Health::Healthy],
        );

        let mut svc = app("web", 10);
        svc.healthcheck_timeout_seconds = 4;
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan_of(vec![svc]), &DeployTag::requested("v2"))
            .await;

        assert!(report.success());
        assert_eq!(probe.removed_ids(), vec!["old_web"]);
    }

    /// pull失敗時はコンテナに一切触れず、残りはSkipped
    #[tokio::test]
    async fn test_pull_failure_touches_nothing() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        compose.push(err("manifest unknown"));

        let plan = plan_of(vec![app("web", 10), app("worker", 20)]);
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &DeployTag::requested("v2"))
            .await;

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.services[0].outcome, Outcome::Failed);
        assert_eq!(report.services[1].outcome, Outcome::Skipped);
        assert!(probe.stopped_ids().is_empty());
        assert!(probe.removed_ids().is_empty());
        // workerへのpullは行われない
        assert_eq!(compose.recorded_args(), vec![vec!["pull", "web"]]);
    }

    /// スケールアップ後に候補がちょうど1つでなければ正常化して中断
    #[tokio::test]
    async fn test_candidate_mismatch() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web"]); // 新コンテナが現れない

        let plan = plan_of(vec![app("web", 10)]);
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &DeployTag::requested("v2"))
            .await;

        assert_eq!(report.exit_code(), 1);
        assert!(probe.stopped_ids().is_empty());
        // スケール1への正常化だけは行う
        let args = compose.recorded_args();
        assert!(args.iter().any(|a| a.contains(&"web=1".to_string())));
    }

    /// ヘルス待ち中のコンテナ終了はロールバック
    #[tokio::test]
    async fn test_container_exit_during_wait() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        probe.mark_exited("new_web");

        let plan = plan_of(vec![app("web", 10)]);
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &DeployTag::requested("v2"))
            .await;

        assert_eq!(report.exit_code(), 1);
        assert_eq!(probe.stopped_ids(), vec!["new_web"]);
        assert_eq!(probe.removed_ids(), vec!["new_web"]);
    }

    /// ヘルス待ち中の中断はベストエフォートで巻き戻して130
    #[tokio::test]
    async fn test_cancel_during_wait() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();
        let cancel: Arc<AtomicBool> = Arc::default();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        *clock.trip_cancel.lock().unwrap() = Some((1, cancel.clone()));

        let plan = plan_of(vec![app("web", 10), app("worker", 20)]);
        let report = engine(&compose, &probe, &clock, &log, cancel)
            .deploy(&plan, &DeployTag::requested("v2"))
            .await;

        assert!(report.cancelled);
        assert_eq!(report.exit_code(), 130);
        assert_eq!(report.services[0].outcome, Outcome::Failed);
        assert_eq!(report.services[1].outcome, Outcome::Skipped);
        // 新コンテナは片付けられ、旧コンテナは残る
        assert_eq!(probe.stopped_ids(), vec!["new_web"]);
        assert_eq!(probe.removed_ids(), vec!["new_web"]);
    }

    /// 開始前に中断されていたら何もしない
    #[tokio::test]
    async fn test_cancel_before_start() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();
        let cancel = Arc::new(AtomicBool::new(true));

        let plan = plan_of(vec![app("web", 10)]);
        let report = engine(&compose, &probe, &clock, &log, cancel)
            .deploy(&plan, &DeployTag::requested("v2"))
            .await;

        assert_eq!(report.exit_code(), 130);
        assert!(compose.recorded_args().is_empty());
    }

    /// --tag未指定ならDEPLOY_TAGを渡さない
    #[tokio::test]
    async fn test_manifest_default_tag_not_exported() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        probe.set_health("new_web", &[Health::Healthy]);

        let plan = plan_of(vec![app("web", 10)]);
        let tag = DeployTag::manifest_default(None);
        assert_eq!(tag.value, "latest");

        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &tag)
            .await;

        assert!(report.success());
        for env in compose.recorded_env() {
            assert!(env.is_empty());
        }
    }

    /// ドレイン失敗は成功として偽装しない
    #[tokio::test]
    async fn test_drain_failure_reported() {
        let compose = FakeCompose::new("");
        let probe = FakeProbe::default();
        let clock = FakeClock::new();
        let log = Logger::new();

        probe.push_list(&["old_web"]);
        probe.push_list(&["old_web", "new_web"]);
        probe.set_health("new_web", &[Health::Healthy]);
        probe.fail_stop_of("old_web");

        let plan = plan_of(vec![app("web", 10)]);
        let report = engine(&compose, &probe, &clock, &log, Arc::default())
            .deploy(&plan, &DeployTag::requested("v2"))
            .await;

        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.services[0].outcome, Outcome::Failed);
    }
}
