use anyhow::Result;
use sensu_plugins::kafka::KafkaOpts;
use sensu_plugins::{plugin, Report, State, Verdict};
use structopt::StructOpt;

fn classify(unavailable: usize, under_replicated: usize) -> Verdict {
    let mut report = Report::new();
    if unavailable > 0 {
        report.push(
            State::CRITICAL,
            format!("There are {} partitions unavailable", unavailable),
        );
    }
    if under_replicated > 0 {
        report.push(
            State::WARNING,
            format!(
                "There are {} partitions not replicated (and probably unavailable)",
                under_replicated
            ),
        );
    }
    report.verdict("All partitions are available and fully replicated")
}

fn run(opt: &Opt) -> Result<Verdict> {
    let unavailable = opt.kafka.describe_topics("--unavailable-partitions")?;
    let under = opt.kafka.describe_topics("--under-replicated-partitions")?;
    Ok(classify(unavailable.len(), under.len()))
}

/// Checks for unavailable and under-replicated Kafka partitions.
#[derive(StructOpt, Debug)]
#[structopt(max_term_width = 80)]
struct Opt {
    #[structopt(flatten)]
    kafka: KafkaOpts,
}

fn main() {
    plugin::main("KAFKA TOPICS REPLICATION", run)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn all_good() {
        assert_eq!(classify(0, 0).state, State::OK);
    }

    #[test]
    fn under_replicated_warns() {
        assert_eq!(
            classify(0, 3),
            Verdict::warning("There are 3 partitions not replicated (and probably unavailable)")
        );
    }

    #[test]
    fn unavailable_dominates() {
        assert_eq!(
            classify(2, 3),
            Verdict::critical("There are 2 partitions unavailable")
        );
    }

    #[test]
    fn flags() {
        let o = Opt::from_iter(&["prog", "-z", "zk1:2181/kafka"]);
        assert_eq!(o.kafka.zookeeper, "zk1:2181/kafka");
        assert_eq!(o.kafka.kafka_home.to_str(), Some("/opt/kafka"));
    }
}
