use actix::prelude::*;
use std::sync::Arc;

use resumedown::cli;
use resumedown::core::{
    CancelTask, DownloadManagerActor, FileMetaStore, HttpTransport, ListTasks, StartDownload,
    Subscribe, TaskState,
};
use resumedown::utils::validator;

#[actix::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let (args, config) = match cli::Args::parse_args() {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("参数解析失败: {}", e);
            std::process::exit(1);
        }
    };
    let urls = args.get_urls()?;
    validator::validate_urls(&urls)?;

    log::info!("{}", config.get_summary());

    let user_agent = config.user_agent.clone();
    let resume = config.resume_by_default;
    let transport = Arc::new(HttpTransport::new(config.timeout)?);
    let store = Box::new(FileMetaStore::new(config.meta_file_path()));
    let manager = DownloadManagerActor::new(config, transport, store).start();

    // 先订阅再启动，保证不漏掉任何快照
    let mut snapshots = manager.send(Subscribe).await?;

    for url in &urls {
        let msg = StartDownload {
            url: url.clone(),
            user_agent: Some(user_agent.clone()),
            content_disposition: None,
            mime_type: None,
            content_length: None,
            resume_from_existing: resume,
        };
        match manager.send(msg).await? {
            Ok(rec) => log::info!("创建下载任务: {} -> {}", url, rec.file_name),
            Err(e) => log::error!("创建下载任务失败: {} - {}", url, e),
        }
    }

    // 消费合并后的任务列表快照，直到本次请求的任务全部结束
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("收到 Ctrl-C，取消所有任务");
                for url in &urls {
                    manager.do_send(CancelTask { url: url.clone() });
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                for t in snapshot.iter().filter(|t| urls.contains(&t.id)) {
                    log::info!(
                        "{} [{}] {}% {} B/s ({}/{} 字节)",
                        t.file_name,
                        t.state.as_str(),
                        t.progress,
                        t.speed_bps,
                        t.downloaded_bytes,
                        t.total_bytes,
                    );
                }
                let all_done = urls.iter().all(|u| {
                    snapshot
                        .iter()
                        .find(|t| &t.id == u)
                        .map(|t| !t.is_active() )
                        .unwrap_or(true)
                });
                if all_done {
                    break;
                }
            }
        }
    }

    let tasks = manager.send(ListTasks).await?;
    let count = |s: TaskState| tasks.iter().filter(|t| t.state == s).count();
    println!("\n下载统计:");
    println!("  总任务数: {}", tasks.len());
    println!("  成功完成: {}", count(TaskState::Completed));
    println!("  失败: {}", count(TaskState::Failed));
    println!("  取消: {}", count(TaskState::Cancelled));
    println!("  暂停: {}", count(TaskState::Paused));

    Ok(())
}
