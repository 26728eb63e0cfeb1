use pgexec::{QueryKey, QueryOptions, Result, ResultCollector};

use crate::connection::connect;

pub async fn main() -> Result<()> {
    let (mut engine, _token) = connect().await?;

    let create = engine.borrow_query(QueryKey::new("CREATE TEMP TABLE pgexec_copy(id int, name text)"));
    let mut sink = ResultCollector::new();
    let options = QueryOptions::new().suppress_begin(true);
    engine.execute(&create, &create.create_parameter_list(), &mut sink, 0, 0, options).await?;

    let Some(mut copy) = engine.start_copy("COPY pgexec_copy FROM STDIN", true).await?.into_in() else {
        unreachable!("COPY FROM STDIN starts a copy-in");
    };
    for id in 0..100 {
        copy.write_row(format!("{id}\tname{id}\n").as_bytes()).await?;
    }
    let copied = copy.finish().await?;
    assert_eq!(copied, 100);

    let Some(mut copy) = engine.start_copy("COPY pgexec_copy TO STDOUT", true).await?.into_out() else {
        unreachable!("COPY TO STDOUT starts a copy-out");
    };
    let mut received = 0;
    while let Some(_row) = copy.read_row().await? {
        received += 1;
    }
    assert_eq!(copy.finish().await?, 100);
    assert_eq!(received, 100);

    // abort keeps the connection usable
    let Some(copy) = engine.start_copy("COPY pgexec_copy FROM STDIN", true).await?.into_in() else {
        unreachable!("COPY FROM STDIN starts a copy-in");
    };
    copy.abort("changed my mind").await?;
    assert!(!engine.is_copy_active());

    engine.close().await?;
    Ok(())
}
