//! Server rendered HTML pages of the web UI.

use chrono::{DateTime, Utc};

use airflow_lite_data::models::{DagRunMetadata, DagRunSummary, RunStatus, TaskStatus};
use airflow_lite_domain::entities::Dag;
use airflow_lite_domain::services::DagOverview;

const STYLE: &str = "body{font-family:sans-serif;margin:2rem;color:#222}\
table{border-collapse:collapse;width:100%;margin:1rem 0}\
th,td{border:1px solid #ddd;padding:.5rem;text-align:left;vertical-align:top}\
th{background:#f4f4f4}\
pre{background:#f8f8f8;border:1px solid #ddd;padding:1rem;white-space:pre-wrap}\
code{font-size:.85rem}\
.status{font-weight:bold}\
.SUCCESS{color:#2e7d32}.FAILED{color:#c62828}.RUNNING{color:#1565c0}\
.QUEUED,.PENDING{color:#6d6d6d}\
nav a{margin-right:1rem}";

/// Escape text for HTML element and attribute content
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn status_badge(status: &str) -> String {
    format!(
        "<span class=\"status {0}\">{0}</span>",
        escape(status)
    )
}

fn page(title: &str, head_extra: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title} - Airflow Lite</title>\n{head_extra}<style>{style}</style>\n</head>\n\
         <body>\n<nav><a href=\"/\">Dashboard</a><a href=\"/swagger-ui\">API docs</a></nav>\n\
         <h1>{title}</h1>\n{body}\n</body>\n</html>\n",
        title = escape(title),
        head_extra = head_extra,
        style = STYLE,
        body = body,
    )
}

fn trigger_form(dag_id: &str) -> String {
    format!(
        "<form method=\"post\" action=\"/api/v1/dags/{}/trigger\"><button type=\"submit\">Trigger</button></form>",
        escape(dag_id)
    )
}

/// `/`: every DAG with its latest run
pub fn dashboard(overviews: &[DagOverview]) -> String {
    let mut rows = String::new();
    for dag in overviews {
        let dag_id = escape(&dag.dag_id);
        let (status, run_link, start) = match &dag.latest_run {
            Some(run) => (
                status_badge(&run.status.to_string()),
                format!(
                    "<a href=\"/dags/{}/runs/{}\"><code>{}</code></a>",
                    dag_id,
                    escape(&run.run_id),
                    escape(&run.run_id)
                ),
                time(Some(run.start_time)),
            ),
            None => ("N/A".to_string(), "N/A".to_string(), "N/A".to_string()),
        };

        rows.push_str(&format!(
            "<tr><td><a href=\"/dags/{id}\">{id}</a></td><td>{schedule}</td><td>{tasks}</td>\
             <td>{status}</td><td>{run}</td><td>{start}</td><td>{trigger}</td></tr>\n",
            id = dag_id,
            schedule = escape(dag.schedule_interval.as_deref().unwrap_or("None")),
            tasks = dag.task_count,
            status = status,
            run = run_link,
            start = start,
            trigger = trigger_form(&dag.dag_id),
        ));
    }

    let body = if overviews.is_empty() {
        "<p>No DAGs registered.</p>".to_string()
    } else {
        format!(
            "<table>\n<tr><th>DAG ID</th><th>Schedule</th><th>Tasks</th><th>Latest Run Status</th>\
             <th>Latest Run ID</th><th>Latest Run Start</th><th></th></tr>\n{}</table>",
            rows
        )
    };

    page("DAGs", "", &body)
}

/// `/dags/{dag_id}`: task definitions and run history
pub fn dag_detail(dag: &Dag, runs: &[DagRunSummary]) -> String {
    let dag_id = escape(dag.dag_id());

    let mut tasks = String::new();
    for task in dag.tasks() {
        let upstream = if task.depends_on.is_empty() {
            "-".to_string()
        } else {
            escape(&task.depends_on.join(", "))
        };
        tasks.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td><code>{}</code></td></tr>\n",
            escape(&task.task_id),
            upstream,
            escape(&task.bigquery_query)
        ));
    }

    let history = if runs.is_empty() {
        "<p>No runs yet.</p>".to_string()
    } else {
        let mut rows = String::new();
        for run in runs {
            rows.push_str(&format!(
                "<tr><td><a href=\"/dags/{}/runs/{}\"><code>{}</code></a></td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                dag_id,
                escape(&run.run_id),
                escape(&run.run_id),
                status_badge(&run.status.to_string()),
                time(Some(run.start_time)),
                time(run.end_time)
            ));
        }
        format!(
            "<table>\n<tr><th>Run ID</th><th>Status</th><th>Start</th><th>End</th></tr>\n{}</table>",
            rows
        )
    };

    let body = format!(
        "{trigger}\n<h2>Tasks</h2>\n<table>\n<tr><th>Task ID</th><th>Depends on</th><th>Query</th></tr>\n{tasks}</table>\n\
         <h2>Run history</h2>\n{history}",
        trigger = trigger_form(dag.dag_id()),
        tasks = tasks,
        history = history,
    );

    page(&format!("DAG: {}", dag.dag_id()), "", &body)
}

/// `/dags/{dag_id}/runs/{run_id}`: task table with log links
pub fn run_detail(run: &DagRunMetadata) -> String {
    let dag_id = escape(&run.dag_id);
    let run_id = escape(&run.run_id);

    let mut rows = String::new();
    for task in &run.task_instances {
        let log = if task.status.is_terminal() {
            format!(
                "<a href=\"/dags/{}/runs/{}/tasks/{}/log\">View log</a>",
                dag_id,
                run_id,
                escape(&task.task_id)
            )
        } else {
            "-".to_string()
        };
        let upstream = if task.depends_on.is_empty() {
            "-".to_string()
        } else {
            escape(&task.depends_on.join(", "))
        };

        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape(&task.task_id),
            status_badge(&task.status.to_string()),
            upstream,
            time(task.start_time),
            time(task.end_time),
            log
        ));
    }

    // Keep refreshing while the run is still moving
    let refresh = if run.status == RunStatus::Running
        || run
            .task_instances
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running))
    {
        "<meta http-equiv=\"refresh\" content=\"5\">\n"
    } else {
        ""
    };

    let body = format!(
        "<p>DAG: <a href=\"/dags/{dag_id}\">{dag_id}</a></p>\n\
         <p>Status: {status}</p>\n<p>Start: {start}<br>End: {end}</p>\n\
         <table>\n<tr><th>Task ID</th><th>Status</th><th>Depends on</th><th>Start</th><th>End</th><th>Log</th></tr>\n{rows}</table>",
        dag_id = dag_id,
        status = status_badge(&run.status.to_string()),
        start = time(Some(run.start_time)),
        end = time(run.end_time),
        rows = rows,
    );

    page(&format!("Run {}", run.run_id), refresh, &body)
}

/// `/dags/{dag_id}/runs/{run_id}/tasks/{task_id}/log`
pub fn log_viewer(dag_id: &str, run_id: &str, task_id: &str, log: &str) -> String {
    let body = format!(
        "<p><a href=\"/dags/{dag}/runs/{run}\">Back to run {run}</a></p>\n<pre>{log}</pre>",
        dag = escape(dag_id),
        run = escape(run_id),
        log = escape(log),
    );
    page(&format!("Log: {}", task_id), "", &body)
}

/// Result page of a trigger submitted from the UI
pub fn trigger_result(dag_id: &str, status: &str, run_id: Option<&str>, detail_url: Option<&str>) -> String {
    let mut body = format!(
        "<p>DAG: <a href=\"/dags/{id}\">{id}</a></p>\n<p>Status: <strong>{status}</strong></p>\n",
        id = escape(dag_id),
        status = escape(status),
    );

    if let Some(run_id) = run_id {
        body.push_str(&format!("<p>Run ID: <code>{}</code></p>\n", escape(run_id)));
    }
    if let Some(url) = detail_url {
        body.push_str(&format!(
            "<p><a href=\"{url}\">{url}</a></p>\n",
            url = escape(url)
        ));
    }

    page("Trigger DAG", "", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airflow_lite_data::models::TaskInstance;
    use airflow_lite_domain::entities::Task;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("<b>\"a\" & 'b'</b>"),
            "&lt;b&gt;&quot;a&quot; &amp; &#39;b&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_dashboard_without_runs() {
        let html = dashboard(&[DagOverview {
            dag_id: "etl".to_string(),
            schedule_interval: None,
            task_count: 1,
            latest_run: None,
        }]);
        assert!(html.contains("<a href=\"/dags/etl\">etl</a>"));
        assert!(html.contains("N/A"));
        assert!(html.contains("action=\"/api/v1/dags/etl/trigger\""));
    }

    #[test]
    fn test_dag_detail_escapes_queries() {
        let dag = Dag::new(
            "etl",
            None,
            vec![Task::new("extract", "SELECT * FROM t WHERE a < 3")],
        )
        .unwrap();
        let html = dag_detail(&dag, &[]);
        assert!(html.contains("WHERE a &lt; 3"));
        assert!(html.contains("No runs yet."));
    }

    #[test]
    fn test_run_detail_links_logs_of_finished_tasks() {
        let now = Utc::now();
        let run = DagRunMetadata {
            dag_id: "etl".to_string(),
            run_id: "r1".to_string(),
            start_time: now,
            end_time: None,
            status: RunStatus::Running,
            task_instances: vec![
                TaskInstance {
                    task_id: "extract".to_string(),
                    status: TaskStatus::Success,
                    start_time: Some(now),
                    end_time: Some(now),
                    log_file_path: "dag_runs/etl/r1/logs/extract.log".to_string(),
                    depends_on: vec![],
                },
                TaskInstance {
                    task_id: "load".to_string(),
                    status: TaskStatus::Queued,
                    start_time: None,
                    end_time: None,
                    log_file_path: "dag_runs/etl/r1/logs/load.log".to_string(),
                    depends_on: vec!["extract".to_string()],
                },
            ],
        };

        let html = run_detail(&run);
        assert!(html.contains("/dags/etl/runs/r1/tasks/extract/log"));
        assert!(!html.contains("/tasks/load/log"));
        assert!(html.contains("http-equiv=\"refresh\""));
    }

    #[test]
    fn test_log_viewer_escapes_content() {
        let html = log_viewer("etl", "r1", "extract", "Task extract failed.\nError: <boom>");
        assert!(html.contains("Error: &lt;boom&gt;"));
    }
}
